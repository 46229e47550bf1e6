use std::path::{Path, PathBuf};

use cprof_pipeline::{report_markdown, PipelineConfig, ProfilePipeline};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn fixture_config(scratch: &Path) -> PipelineConfig {
    let root = workspace_root();
    let mut config = PipelineConfig::for_workspace(&root);
    config.data_dir = root.join("fixtures");
    config.output_dir = scratch.join("cleaned");
    config.reports_dir = scratch.join("reports");
    config
}

fn read(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(path.as_ref())
        .unwrap_or_else(|err| panic!("reading {}: {err}", path.as_ref().display()))
}

#[tokio::test]
async fn fixture_run_writes_tables_reports_and_snapshots() {
    let scratch = tempfile::tempdir().unwrap();
    let config = fixture_config(scratch.path());
    let pipeline = ProfilePipeline::from_config(config.clone()).unwrap();

    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.run_id, pipeline.run_id());
    assert_eq!(summary.categories, 3);
    assert_eq!(summary.skipped_fragments, 1);
    assert_eq!(summary.outliers_removed, 0);

    let cleaned = &config.output_dir;
    let links = read(cleaned.join("technologist/technologist_profile_links.csv"));
    assert_eq!(links.lines().count(), 1 + 3, "duplicate and incomplete links dropped");
    let consultant_links = read(cleaned.join("consultant/consultant_profile_links.csv"));
    assert!(consultant_links.contains("2,Lee Chen,"));

    let experience = read(cleaned.join("all_name_and_experience_info.csv"));
    assert!(experience.starts_with("person_key,company,position,"));
    assert!(experience.contains("executive_7,Unlisted Ltd,Chief Technology Officer,"));
    assert!(experience.contains("Ada Lovelace"));
    assert!(!experience.contains("Bletchley Park"));

    let reports = PathBuf::from(&summary.reports_dir);
    for name in [
        "education_level_distribution",
        "major_type_distribution",
        "person_education",
        "top_skills",
        "experience_totals",
        "experience_histogram",
        "current_company",
        "tenure_histogram",
        "positions_at_current_company",
        "role_flags",
        "skills_matrix",
    ] {
        assert!(reports.join(format!("{name}.csv")).is_file(), "{name}.csv missing");
    }

    let people = read(reports.join("person_education.csv"));
    assert!(people.contains("technologist_1,technologist,PhD,"));
    assert!(people.contains("technologist_2,technologist,MBA,"));
    assert!(people.contains("executive_1,executive,PhD,"));

    let current = read(reports.join("current_company.csv"));
    assert!(current.contains("technologist_0,technologist,Acme Analytics,"));
    assert!(current.contains("consultant_2,consultant,KPMG,"));

    let brief = read(reports.join("summary.md"));
    assert!(brief.starts_with("# Career Profile Run Brief"));
    assert!(brief.contains("Principal Data Scientists (technologist)"));
    assert!(brief.contains("## Skipped Fragments"));
    assert!(brief.contains("1 experience rows had no profile link."));

    let run: serde_json::Value = serde_json::from_str(&read(reports.join("run.json"))).unwrap();
    assert_eq!(run["status"], "completed");
    assert_eq!(run["merge"]["unmatched_experience_rows"], 1);
    assert_eq!(run["categories"].as_array().map(Vec::len), Some(3));

    let manifest: serde_json::Value = serde_json::from_str(&read(&summary.parquet_manifest)).unwrap();
    assert_eq!(manifest["schema_version"], 1);
    let files = manifest["files"].as_array().unwrap();
    assert_eq!(files.len(), 11);
    assert!(files
        .iter()
        .all(|f| f["path"].as_str().is_some_and(|p| p.starts_with("snapshots/"))));

    let listing = report_markdown(5, &config.reports_dir).unwrap();
    assert!(listing.contains(&summary.run_id.to_string()));
}

#[tokio::test]
async fn merge_without_cleaned_links_fails() {
    let scratch = tempfile::tempdir().unwrap();
    let pipeline = ProfilePipeline::from_config(fixture_config(scratch.path())).unwrap();

    let err = pipeline.merge().await.unwrap_err();
    assert!(format!("{err:#}").contains("profile_links"));
}

#[tokio::test]
async fn stages_can_run_one_at_a_time() {
    let scratch = tempfile::tempdir().unwrap();
    let config = fixture_config(scratch.path());
    let pipeline = ProfilePipeline::from_config(config.clone()).unwrap();

    let links = pipeline.links().await.unwrap();
    assert_eq!(links.iter().map(|l| l.cleaned_rows).collect::<Vec<_>>(), vec![3, 3, 2]);
    assert_eq!(links[1].raw_rows, 5);

    let cleaned = pipeline.clean().await.unwrap();
    let technologist = &cleaned[0];
    assert_eq!(technologist.skipped_fragments.len(), 1);
    assert_eq!(technologist.mismatched_experience_rows, 1);
    assert!(technologist.sentinel_education_rows >= 1);

    let merge = pipeline.merge().await.unwrap();
    assert_eq!(merge.unmatched_experience_rows, 1);

    let summary = pipeline.aggregate().await.unwrap();
    assert_eq!(summary.skipped_fragments, 0, "standalone aggregate has no clean records");
    assert!(summary.people_with_experience_totals > 0);
}
