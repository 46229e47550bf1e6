use anyhow::Result;
use clap::{Parser, Subcommand};
use cprof_pipeline::{report_markdown, PipelineConfig, ProfilePipeline, RunSummary};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cprof-cli")]
#[command(about = "Career profile normalization pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Clean raw profile-link files into each category's main link table.
    Links,
    /// Normalize education, experience and skills fragments per category.
    Clean,
    /// Concatenate cleaned category tables into the `all_*` tables.
    Merge,
    /// Compute the derived datasets and write a report run.
    Aggregate,
    /// Every stage in order.
    Run,
    /// List the most recent report runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

fn print_run(summary: &RunSummary) {
    println!(
        "run complete: run_id={} categories={} people_with_education={} experience_totals={} outliers_removed={} skipped_fragments={} reports={}",
        summary.run_id,
        summary.categories,
        summary.people_with_education,
        summary.people_with_experience_totals,
        summary.outliers_removed,
        summary.skipped_fragments,
        summary.reports_dir
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Report { runs } => {
            println!("{}", report_markdown(runs, &config.reports_dir)?);
        }
        Commands::Links => {
            let pipeline = ProfilePipeline::from_config(config)?;
            for summary in pipeline.links().await? {
                println!(
                    "links: category={} raw_rows={} cleaned_rows={} path={}",
                    summary.category,
                    summary.raw_rows,
                    summary.cleaned_rows,
                    summary.path.display()
                );
            }
        }
        Commands::Clean => {
            let pipeline = ProfilePipeline::from_config(config)?;
            for summary in pipeline.clean().await? {
                println!(
                    "clean: category={} education={} experience={} mismatched={} skills_people={} skipped_fragments={}",
                    summary.category,
                    summary.education_rows,
                    summary.experience_rows,
                    summary.mismatched_experience_rows,
                    summary.skills_people,
                    summary.skipped_fragments.len()
                );
            }
        }
        Commands::Merge => {
            let summary = ProfilePipeline::from_config(config)?.merge().await?;
            println!(
                "merge: education={} experience={} unmatched_links={} skills_people={} skills_columns={}",
                summary.education_rows,
                summary.experience_rows,
                summary.unmatched_experience_rows,
                summary.skills_people,
                summary.skills_columns
            );
        }
        Commands::Aggregate => {
            let summary = ProfilePipeline::from_config(config)?.aggregate().await?;
            print_run(&summary);
        }
        Commands::Run => {
            let summary = ProfilePipeline::from_config(config)?.run().await?;
            print_run(&summary);
        }
    }

    Ok(())
}
