use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use cprof_core::Category;
use cprof_normalize::ExperienceOptions;
use serde::Deserialize;
use thiserror::Error;

use crate::aggregate::AggregateOptions;

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workspace_root: PathBuf,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub present_date: NaiveDate,
    pub history_cutoff: NaiveDate,
    pub outlier_sigmas: f64,
    pub experience_bin_months: u32,
    pub tenure_bin_months: u32,
    pub top_skills: usize,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("CPROF_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let data_dir = std::env::var("CPROF_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let output_dir = std::env::var("CPROF_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("cleaned"));
        let reports_dir = std::env::var("CPROF_REPORTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./reports"));
        let defaults = Self::for_workspace(&workspace_root);

        Self {
            workspace_root,
            data_dir,
            output_dir,
            reports_dir,
            present_date: env_or("CPROF_PRESENT_DATE", defaults.present_date),
            history_cutoff: env_or("CPROF_HISTORY_CUTOFF", defaults.history_cutoff),
            outlier_sigmas: env_or("CPROF_OUTLIER_SIGMAS", defaults.outlier_sigmas),
            experience_bin_months: env_or("CPROF_EXPERIENCE_BIN_MONTHS", defaults.experience_bin_months)
                .max(1),
            tenure_bin_months: env_or("CPROF_TENURE_BIN_MONTHS", defaults.tenure_bin_months).max(1),
            top_skills: env_or("CPROF_TOP_SKILLS", defaults.top_skills),
        }
    }

    /// Defaults with every directory placed under `root`.
    pub fn for_workspace(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            data_dir: root.join("data"),
            output_dir: root.join("data").join("cleaned"),
            reports_dir: root.join("reports"),
            workspace_root: root,
            present_date: ymd(2022, 11, 1),
            history_cutoff: ymd(1930, 1, 1),
            outlier_sigmas: 3.0,
            experience_bin_months: 24,
            tenure_bin_months: 12,
            top_skills: 30,
        }
    }

    pub fn experience_options(&self) -> ExperienceOptions {
        ExperienceOptions {
            present_date: self.present_date,
        }
    }

    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            history_cutoff: self.history_cutoff,
            outlier_sigmas: self.outlier_sigmas,
            experience_bin_months: self.experience_bin_months,
            tenure_bin_months: self.tenure_bin_months,
            top_skills: self.top_skills,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("category tag `{0}` is not one of technologist, consultant, executive")]
    UnknownTag(String),
    #[error("category tag `{0}` is listed more than once")]
    DuplicateTag(String),
    #[error("category tag `{0}` must be non-empty and free of `_`")]
    InvalidTag(String),
    #[error("category tags `{inner}` and `{outer}` overlap; person keys would be ambiguous")]
    OverlappingTags { inner: String, outer: String },
    #[error("category `{0}` has no profile-link files")]
    NoLinkFiles(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRegistry {
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub tag: String,
    pub display_name: String,
    pub enabled: bool,
    /// Fragment directory, relative to the data dir.
    pub fragments_dir: PathBuf,
    pub links: Vec<LinkSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkSource {
    pub path: PathBuf,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl CategoryConfig {
    /// Infallible once the registry has been validated.
    pub fn category(&self) -> Option<Category> {
        Category::from_tag(&self.tag)
    }
}

/// Reject tags that are empty, contain the key separator, or are substrings
/// of one another.
pub fn validate_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Result<(), RegistryError> {
    let tags = tags.into_iter().collect::<Vec<_>>();
    for (i, tag) in tags.iter().enumerate() {
        if tag.is_empty() || tag.contains('_') {
            return Err(RegistryError::InvalidTag(tag.to_string()));
        }
        for (j, other) in tags.iter().enumerate() {
            if i == j {
                continue;
            }
            if tag == other {
                return Err(RegistryError::DuplicateTag(tag.to_string()));
            }
            if other.contains(tag) {
                return Err(RegistryError::OverlappingTags {
                    inner: tag.to_string(),
                    outer: other.to_string(),
                });
            }
        }
    }
    Ok(())
}

impl CategoryRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text).context("parsing category registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("categories.yaml");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        validate_tags(self.categories.iter().map(|c| c.tag.as_str()))?;
        for config in &self.categories {
            if config.category().is_none() {
                return Err(RegistryError::UnknownTag(config.tag.clone()));
            }
            if config.links.is_empty() {
                return Err(RegistryError::NoLinkFiles(config.tag.clone()));
            }
        }
        Ok(())
    }

    /// Enabled categories paired with their parsed tag.
    pub fn enabled(&self) -> impl Iterator<Item = (Category, &CategoryConfig)> {
        self.categories
            .iter()
            .filter(|c| c.enabled)
            .filter_map(|c| c.category().map(|category| (category, c)))
    }

    pub fn display_name(&self, category: Category) -> String {
        self.categories
            .iter()
            .find(|c| c.tag == category.tag())
            .map(|c| c.display_name.clone())
            .unwrap_or_else(|| category.tag().to_string())
    }
}
