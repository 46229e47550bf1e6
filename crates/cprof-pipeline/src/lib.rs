//! Pipeline orchestration: link cleaning, per-category normalization, the
//! cross-category merge and the aggregate report run.

pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod merge;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cprof_core::{
    Category, EducationRecord, ExperienceRecord, RawEducationRow, RawExperienceRow, RawSkillsRow,
    SkillsMatrix,
};
use cprof_normalize::{normalize_education, normalize_experience, normalize_skills, RuleSet};
use cprof_storage::{
    clean_profile_links, load_fragments, load_profile_links, read_raw_profile_links, rows_to_csv_bytes,
    FragmentKind, LoadSummary, SkippedFragment, TableStore,
};
use serde::Serialize;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use aggregate::{aggregate, AggregateOptions, Aggregates, OutlierBounds};
pub use config::{CategoryConfig, CategoryRegistry, LinkSource, PipelineConfig, RegistryError};
pub use dataset::{Column, Dataset, ParquetManifest, ParquetManifestFile};

pub const CRATE_NAME: &str = "cprof-pipeline";

pub const EDUCATION_TABLE: &str = "education_info.csv";
pub const EXPERIENCE_TABLE: &str = "name_and_experience_info.csv";
pub const SKILLS_TABLE: &str = "skills_info.csv";

pub fn links_table(category: Category) -> PathBuf {
    PathBuf::from(category.tag()).join(format!("{}_profile_links.csv", category.tag()))
}

pub fn category_table(category: Category, table: &str) -> PathBuf {
    PathBuf::from(category.tag()).join(table)
}

pub fn merged_table(table: &str) -> PathBuf {
    PathBuf::from(format!("all_{table}"))
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkStageSummary {
    pub category: Category,
    pub raw_rows: usize,
    pub cleaned_rows: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCleanSummary {
    pub category: Category,
    pub education_rows: usize,
    pub sentinel_education_rows: usize,
    pub experience_rows: usize,
    pub mismatched_experience_rows: usize,
    pub unparseable_experience_rows: usize,
    pub null_date_rows: usize,
    pub skills_people: usize,
    pub skills_columns: usize,
    pub loaded_fragments: usize,
    pub skipped_fragments: Vec<SkippedFragment>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeSummary {
    pub education_rows: usize,
    pub experience_rows: usize,
    pub unmatched_experience_rows: usize,
    pub skills_people: usize,
    pub skills_columns: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub stages: Vec<String>,
    pub categories: Vec<CategoryCleanSummary>,
    pub merge: Option<MergeSummary>,
    pub outliers: OutlierBounds,
    pub datasets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: usize,
    pub people_with_education: usize,
    pub people_with_experience_totals: usize,
    pub skipped_fragments: usize,
    pub outliers_removed: usize,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

pub struct ProfilePipeline {
    config: PipelineConfig,
    registry: CategoryRegistry,
    rules: RuleSet,
    store: TableStore,
    run_id: Uuid,
}

impl ProfilePipeline {
    pub fn new(config: PipelineConfig, registry: CategoryRegistry, rules: RuleSet) -> Self {
        let store = TableStore::new(config.output_dir.clone());
        Self {
            config,
            registry,
            rules,
            store,
            run_id: Uuid::new_v4(),
        }
    }

    /// Registry from `categories.yaml`; rules from `rules/` when the workspace
    /// has one, the built-in tables otherwise.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let registry = CategoryRegistry::load(&config.workspace_root)?;
        let rules_dir = config.workspace_root.join("rules");
        let rules = if rules_dir.is_dir() {
            RuleSet::from_dir(&rules_dir)?
        } else {
            info!("no rules/ directory in workspace; using built-in rule tables");
            RuleSet::builtin().context("compiling built-in rules")?
        };
        Ok(Self::new(config, registry, rules))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn display_names(&self) -> BTreeMap<Category, String> {
        Category::ALL
            .into_iter()
            .map(|c| (c, self.registry.display_name(c)))
            .collect()
    }

    /// Clean each enabled category's raw link files into its main link table.
    pub async fn links(&self) -> Result<Vec<LinkStageSummary>> {
        let mut summaries = Vec::new();
        for (category, config) in self.registry.enabled() {
            let span = info_span!("links", run_id = %self.run_id, category = %category);
            let summary = self.clean_links(category, config).instrument(span).await?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    async fn clean_links(&self, category: Category, config: &CategoryConfig) -> Result<LinkStageSummary> {
        let mut sources = Vec::with_capacity(config.links.len());
        for source in &config.links {
            let path = self.config.data_dir.join(&source.path);
            let rows = read_raw_profile_links(&path, source.limit)
                .with_context(|| format!("loading profile links for {category}"))?;
            sources.push(rows);
        }
        let raw_rows = sources.iter().map(Vec::len).sum();
        let links = clean_profile_links(sources);

        let relative = links_table(category);
        let stored = self
            .store
            .write_table(&relative, &rows_to_csv_bytes(&links)?)
            .await?;
        info!(raw_rows, cleaned_rows = links.len(), "profile links cleaned");
        Ok(LinkStageSummary {
            category,
            raw_rows,
            cleaned_rows: links.len(),
            path: stored.absolute_path,
        })
    }

    /// Load, normalize and persist every enabled category's fragments.
    pub async fn clean(&self) -> Result<Vec<CategoryCleanSummary>> {
        let mut summaries = Vec::new();
        for (category, config) in self.registry.enabled() {
            let span = info_span!("clean", run_id = %self.run_id, category = %category);
            let summary = self.clean_category(category, config).instrument(span).await?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    async fn clean_category(&self, category: Category, config: &CategoryConfig) -> Result<CategoryCleanSummary> {
        let fragments_dir = self.config.data_dir.join(&config.fragments_dir);
        let education = load_fragments::<RawEducationRow>(&fragments_dir, FragmentKind::Education)?;
        let experience = load_fragments::<RawExperienceRow>(&fragments_dir, FragmentKind::Experience)?;
        let skills = load_fragments::<RawSkillsRow>(&fragments_dir, FragmentKind::Skills)?;

        let mut loads = LoadSummary::default();
        loads.extend(education.summary);
        loads.extend(experience.summary);
        loads.extend(skills.summary);
        if !loads.skipped.is_empty() {
            warn!(skipped = loads.skipped.len(), "some fragments could not be read");
        }

        let education = normalize_education(&education.rows, category, &self.rules.education);
        let experience = normalize_experience(&experience.rows, category, &self.config.experience_options())
            .with_context(|| format!("pairing positions for {category}"))?;
        let skills = normalize_skills(&skills.rows, category, &self.rules.skills);

        self.store
            .write_table(category_table(category, EDUCATION_TABLE), &rows_to_csv_bytes(&education)?)
            .await?;
        self.store
            .write_table(
                category_table(category, EXPERIENCE_TABLE),
                &rows_to_csv_bytes(&experience.records)?,
            )
            .await?;
        self.store
            .write_table(
                category_table(category, SKILLS_TABLE),
                &merge::skills_matrix_dataset("skills_info", &skills).to_csv_bytes()?,
            )
            .await?;

        let summary = CategoryCleanSummary {
            category,
            education_rows: education.len(),
            sentinel_education_rows: education.iter().filter(|r| r.is_sentinel()).count(),
            experience_rows: experience.records.len(),
            mismatched_experience_rows: experience.mismatched_rows,
            unparseable_experience_rows: experience.unparseable_lists,
            null_date_rows: experience.null_date_rows,
            skills_people: skills.rows.len(),
            skills_columns: skills.columns.len(),
            loaded_fragments: loads.loaded.len(),
            skipped_fragments: loads.skipped,
        };
        info!(
            education_rows = summary.education_rows,
            experience_rows = summary.experience_rows,
            skills_people = summary.skills_people,
            "category cleaned"
        );
        Ok(summary)
    }

    fn read_skills(&self, relative: impl AsRef<Path>) -> Result<SkillsMatrix> {
        let relative = relative.as_ref();
        let (header, records) = self.store.read_records(relative)?;
        merge::skills_matrix_from_records(&header, &records)
            .with_context(|| format!("decoding {}", relative.display()))
    }

    /// Concatenate the cleaned category tables into the `all_*` tables and
    /// join link metadata onto experience rows.
    pub async fn merge(&self) -> Result<MergeSummary> {
        let span = info_span!("merge", run_id = %self.run_id);
        async {
            let mut education = Vec::new();
            let mut experience = Vec::new();
            let mut skills = Vec::new();
            let mut unmatched = 0;

            for (category, _) in self.registry.enabled() {
                let links = load_profile_links(&self.store.path_of(links_table(category)))
                    .with_context(|| format!("merging {category}"))?;
                education.push((
                    category,
                    self.store
                        .read_rows::<EducationRecord>(category_table(category, EDUCATION_TABLE))?,
                ));
                let mut rows = self
                    .store
                    .read_rows::<ExperienceRecord>(category_table(category, EXPERIENCE_TABLE))?;
                unmatched += merge::attach_profile_links(&mut rows, &links);
                experience.push((category, rows));
                let matrix = self.read_skills(category_table(category, SKILLS_TABLE))?;
                skills.push((category, matrix.rows));
            }

            let education = merge::concat_tables(education, |r| r.person_key)?;
            let experience = merge::concat_tables(experience, |r| r.person_key)?;
            let skills = SkillsMatrix::from_rows(merge::concat_tables(skills, |r| r.person_key)?);

            self.store
                .write_table(merged_table(EDUCATION_TABLE), &rows_to_csv_bytes(&education)?)
                .await?;
            self.store
                .write_table(merged_table(EXPERIENCE_TABLE), &rows_to_csv_bytes(&experience)?)
                .await?;
            self.store
                .write_table(
                    merged_table(SKILLS_TABLE),
                    &merge::skills_matrix_dataset("all_skills_info", &skills).to_csv_bytes()?,
                )
                .await?;

            if unmatched > 0 {
                warn!(unmatched, "experience rows without a profile link kept with empty metadata");
            }
            let summary = MergeSummary {
                education_rows: education.len(),
                experience_rows: experience.len(),
                unmatched_experience_rows: unmatched,
                skills_people: skills.rows.len(),
                skills_columns: skills.columns.len(),
            };
            info!(
                education_rows = summary.education_rows,
                experience_rows = summary.experience_rows,
                skills_people = summary.skills_people,
                "categories merged"
            );
            Ok::<_, anyhow::Error>(summary)
        }
        .instrument(span)
        .await
    }

    /// Compute every derived dataset from the merged tables and write the
    /// report directory for this run.
    pub async fn aggregate(&self) -> Result<RunSummary> {
        self.aggregate_with(Utc::now(), Vec::new(), None, vec!["aggregate".to_string()])
            .await
    }

    async fn aggregate_with(
        &self,
        started_at: DateTime<Utc>,
        categories: Vec<CategoryCleanSummary>,
        merge: Option<MergeSummary>,
        stages: Vec<String>,
    ) -> Result<RunSummary> {
        let span = info_span!("aggregate", run_id = %self.run_id);
        async {
            let education = self
                .store
                .read_rows::<EducationRecord>(merged_table(EDUCATION_TABLE))?;
            let experience = self
                .store
                .read_rows::<ExperienceRecord>(merged_table(EXPERIENCE_TABLE))?;
            let skills = self.read_skills(merged_table(SKILLS_TABLE))?;

            let aggregates = aggregate(
                &education,
                &experience,
                &skills,
                &self.rules.roles,
                &self.config.aggregate_options(),
            );
            info!(
                mean = aggregates.outliers.mean,
                lower = aggregates.outliers.lower,
                upper = aggregates.outliers.upper,
                removed = aggregates.outliers.removed,
                "experience outliers trimmed"
            );

            let mut datasets = aggregates.datasets(&self.display_names());
            datasets.push(merge::skills_matrix_dataset("skills_matrix", &skills));

            let record = RunRecord {
                run_id: self.run_id,
                started_at,
                finished_at: Utc::now(),
                status: "completed".to_string(),
                stages,
                categories,
                merge,
                outliers: aggregates.outliers,
                datasets: datasets.iter().map(|d| d.name.clone()).collect(),
            };
            let reports_dir = self.write_reports(&record, &aggregates, &datasets).await?;
            let manifest_path = self.export_parquet_snapshots(&reports_dir, &datasets).await?;

            Ok::<_, anyhow::Error>(RunSummary {
                run_id: self.run_id,
                started_at: record.started_at,
                finished_at: record.finished_at,
                categories: self.registry.enabled().count(),
                people_with_education: aggregates.person_education.len(),
                people_with_experience_totals: aggregates.experience_totals.len(),
                skipped_fragments: record.categories.iter().map(|c| c.skipped_fragments.len()).sum(),
                outliers_removed: aggregates.outliers.removed,
                reports_dir: reports_dir.display().to_string(),
                parquet_manifest: manifest_path.display().to_string(),
            })
        }
        .instrument(span)
        .await
    }

    /// Every stage in order: links, clean, merge, aggregate.
    pub async fn run(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        info!(run_id = %self.run_id, "pipeline run started");
        self.links().await?;
        let categories = self.clean().await?;
        let merge = self.merge().await?;
        let stages = ["links", "clean", "merge", "aggregate"]
            .into_iter()
            .map(String::from)
            .collect();
        self.aggregate_with(started_at, categories, Some(merge), stages)
            .await
    }

    async fn write_reports(
        &self,
        record: &RunRecord,
        aggregates: &Aggregates,
        datasets: &[Dataset],
    ) -> Result<PathBuf> {
        let reports_dir = self.config.reports_dir.join(self.run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let report_store = TableStore::new(reports_dir.clone());
        for dataset in datasets {
            report_store
                .write_table(format!("{}.csv", dataset.name), &dataset.to_csv_bytes()?)
                .await?;
        }

        fs::write(reports_dir.join("summary.md"), self.summary_markdown(record, aggregates))
            .await
            .context("writing summary.md")?;

        let run_json = serde_json::to_vec_pretty(record).context("serializing run record")?;
        fs::write(reports_dir.join("run.json"), run_json)
            .await
            .context("writing run.json")?;

        Ok(reports_dir)
    }

    fn summary_markdown(&self, record: &RunRecord, aggregates: &Aggregates) -> String {
        let names = self.display_names();
        let mut per_category: BTreeMap<Category, [usize; 3]> = BTreeMap::new();
        for person in &aggregates.person_education {
            per_category.entry(person.person_key.category).or_default()[0] += 1;
        }
        for key in aggregates.experience_totals.keys() {
            per_category.entry(key.category).or_default()[1] += 1;
        }
        for current in &aggregates.current_companies {
            per_category.entry(current.person_key.category).or_default()[2] += 1;
        }

        let mut lines = vec![
            "# Career Profile Run Brief".to_string(),
            String::new(),
            format!("- Run ID: `{}`", record.run_id),
            format!("- Started: {}", record.started_at),
            format!("- Finished: {}", record.finished_at),
            format!("- Stages: {}", record.stages.join(", ")),
            format!(
                "- Outliers removed: {} (bounds {:.1} .. {:.1} months)",
                record.outliers.removed, record.outliers.lower, record.outliers.upper
            ),
            String::new(),
            "## People per Category".to_string(),
        ];
        for (category, [education, experience, current]) in &per_category {
            lines.push(format!(
                "- {} ({}): education {}, experience totals {}, current company {}",
                names.get(category).map(String::as_str).unwrap_or(category.tag()),
                category,
                education,
                experience,
                current
            ));
        }

        let skipped = record
            .categories
            .iter()
            .flat_map(|c| c.skipped_fragments.iter())
            .collect::<Vec<_>>();
        if !skipped.is_empty() {
            lines.push(String::new());
            lines.push("## Skipped Fragments".to_string());
            for fragment in skipped {
                lines.push(format!("- `{}`: {}", fragment.path.display(), fragment.reason));
            }
        }
        if let Some(merge) = &record.merge {
            if merge.unmatched_experience_rows > 0 {
                lines.push(String::new());
                lines.push(format!(
                    "{} experience rows had no profile link.",
                    merge.unmatched_experience_rows
                ));
            }
        }
        lines.push(String::new());
        lines.join("\n")
    }

    async fn export_parquet_snapshots(&self, reports_dir: &Path, datasets: &[Dataset]) -> Result<PathBuf> {
        let snapshot_dir = reports_dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)
            .await
            .with_context(|| format!("creating {}", snapshot_dir.display()))?;

        let mut files = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            let path = snapshot_dir.join(format!("{}.parquet", dataset.name));
            dataset::write_parquet(&path, dataset.to_record_batch()?)?;
            files.push(dataset::manifest_entry(&dataset.name, reports_dir, &path)?);
        }

        let manifest = ParquetManifest {
            schema_version: 1,
            files,
        };
        let manifest_path = snapshot_dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;
        Ok(manifest_path)
    }
}

pub async fn run_pipeline_from_env() -> Result<RunSummary> {
    ProfilePipeline::from_config(PipelineConfig::from_env())?.run().await
}

/// Markdown listing of the most recent report runs, newest first.
pub fn report_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter(|entry| entry.path().join("run.json").is_file())
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Career Profile Reports".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let run_path = dir.path().join("run.json");
        let manifest_path = dir.path().join("snapshots").join("manifest.json");

        let run: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&run_path)
                .with_context(|| format!("reading {}", run_path.display()))?,
        )
        .with_context(|| format!("parsing {}", run_path.display()))?;
        let finished = run
            .get("finished_at")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let stages = run
            .get("stages")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|s| s.as_str()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        let datasets = run
            .get("datasets")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let removed = run
            .get("outliers")
            .and_then(|v| v.get("removed"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- finished: {finished}"));
        lines.push(format!("- stages: {stages}"));
        lines.push(format!("- datasets: {datasets}"));
        lines.push(format!("- outliers removed: {removed}"));
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}
