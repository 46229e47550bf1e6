//! Versioned pattern tables (degree levels, major families, role types,
//! skill remapping), loaded once and compiled into immutable structures.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use cprof_core::{Category, DegreeFlags, MajorType};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;

use crate::skills::SkillTable;

pub const RULES_VERSION: u32 = 1;

const BUILTIN_EDUCATION: &str = include_str!("../../../rules/education.yaml");
const BUILTIN_SKILLS: &str = include_str!("../../../rules/skills.yaml");
const BUILTIN_ROLES: &str = include_str!("../../../rules/roles.yaml");

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("{file}: unsupported rules version {found} (expected {expected})", expected = RULES_VERSION)]
    UnsupportedVersion { file: &'static str, found: u32 },
    #[error("{file}: invalid pattern `{pattern}`")]
    BadPattern {
        file: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("degree pattern for {level:?} must be anchored with `^`: `{pattern}`")]
    UnanchoredPattern { level: DegreeLevel, pattern: String },
    #[error("major rule {major:?} has neither keywords nor a pattern")]
    EmptyMajorRule { major: MajorType },
    #[error("skill remap key `{key}` is not in canonical form (normalizes to `{normalized}`)")]
    UnreachableKey { key: String, normalized: String },
    #[error("skill remap `{from}` -> `{via}` chains to `{to}`; remapped names must be final")]
    SkillRemapChain { from: String, via: String, to: String },
    #[error("skill remap value `{value}` is not in canonical form (normalizes to `{normalized}`)")]
    UnstableValue { value: String, normalized: String },
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegreeLevel {
    Bachelor,
    Master,
    Mba,
    Doctorate,
}

#[derive(Debug, Deserialize)]
struct EducationRulesFile {
    version: u32,
    degree_levels: Vec<DegreeLevelEntry>,
    major_types: Vec<MajorEntry>,
}

#[derive(Debug, Deserialize)]
struct DegreeLevelEntry {
    level: DegreeLevel,
    pattern: String,
}

#[derive(Debug, Deserialize)]
struct MajorEntry {
    major: MajorType,
    #[serde(default)]
    contains_any: Vec<String>,
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SkillRulesFile {
    version: u32,
    #[serde(default)]
    invariant_words: Vec<String>,
    #[serde(default)]
    remap: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RoleRulesFile {
    version: u32,
    #[serde(default)]
    roles: BTreeMap<Category, Vec<RoleEntry>>,
}

#[derive(Debug, Deserialize)]
struct RoleEntry {
    role: String,
    label: String,
    pattern: String,
    #[serde(default)]
    exclude: Option<String>,
}

fn compile(file: &'static str, pattern: &str) -> Result<Regex, RulesError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| RulesError::BadPattern {
            file,
            pattern: pattern.to_string(),
            source,
        })
}

fn check_version(file: &'static str, found: u32) -> Result<(), RulesError> {
    if found == RULES_VERSION {
        Ok(())
    } else {
        Err(RulesError::UnsupportedVersion { file, found })
    }
}

#[derive(Debug, Clone)]
struct DegreeLevelRule {
    level: DegreeLevel,
    regex: Regex,
}

#[derive(Debug, Clone)]
struct MajorRule {
    major: MajorType,
    contains_any: Vec<String>,
    regex: Option<Regex>,
}

impl MajorRule {
    fn matches(&self, text: &str) -> bool {
        self.contains_any.iter().any(|needle| text.contains(needle.as_str()))
            || self.regex.as_ref().is_some_and(|re| re.is_match(text))
    }
}

/// Degree-level and major-family classifiers.
#[derive(Debug, Clone)]
pub struct EducationRules {
    degree_levels: Vec<DegreeLevelRule>,
    major_types: Vec<MajorRule>,
}

impl EducationRules {
    pub fn from_yaml(text: &str) -> Result<Self, RulesError> {
        const FILE: &str = "education.yaml";
        let file: EducationRulesFile = serde_yaml::from_str(text)?;
        check_version(FILE, file.version)?;

        let degree_levels = file
            .degree_levels
            .into_iter()
            .map(|rule| {
                if !rule.pattern.starts_with('^') {
                    return Err(RulesError::UnanchoredPattern {
                        level: rule.level,
                        pattern: rule.pattern,
                    });
                }
                Ok(DegreeLevelRule {
                    level: rule.level,
                    regex: compile(FILE, &rule.pattern)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let major_types = file
            .major_types
            .into_iter()
            .map(|rule| {
                if rule.contains_any.is_empty() && rule.pattern.is_none() {
                    return Err(RulesError::EmptyMajorRule { major: rule.major });
                }
                Ok(MajorRule {
                    major: rule.major,
                    contains_any: rule
                        .contains_any
                        .iter()
                        .map(|s| s.to_lowercase())
                        .collect(),
                    regex: rule
                        .pattern
                        .as_deref()
                        .map(|p| compile(FILE, p))
                        .transpose()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            degree_levels,
            major_types,
        })
    }

    /// Apply every degree-level matcher independently to a lowercased degree name.
    pub fn classify_degree(&self, degree_name: &str) -> DegreeFlags {
        let mut flags = DegreeFlags::default();
        for rule in &self.degree_levels {
            if rule.regex.is_match(degree_name) {
                match rule.level {
                    DegreeLevel::Bachelor => flags.bachelor = true,
                    DegreeLevel::Master => flags.master = true,
                    DegreeLevel::Mba => flags.mba = true,
                    DegreeLevel::Doctorate => flags.doctorate = true,
                }
            }
        }
        flags
    }

    /// First major family (in rule order) whose keywords or pattern appear in the text.
    pub fn classify_major(&self, degree_name: &str) -> Option<MajorType> {
        let text = degree_name.to_lowercase();
        self.major_types
            .iter()
            .find(|rule| rule.matches(&text))
            .map(|rule| rule.major)
    }
}

/// One role-type flag: a title matches when `pattern` is found and `exclude` is not.
#[derive(Debug, Clone)]
pub struct RoleRule {
    pub role: String,
    pub label: String,
    pattern: Regex,
    exclude: Option<Regex>,
}

impl RoleRule {
    pub fn matches(&self, title: &str) -> bool {
        self.pattern.is_match(title) && !self.exclude.as_ref().is_some_and(|re| re.is_match(title))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleRules {
    by_category: BTreeMap<Category, Vec<RoleRule>>,
}

impl RoleRules {
    pub fn from_yaml(text: &str) -> Result<Self, RulesError> {
        const FILE: &str = "roles.yaml";
        let file: RoleRulesFile = serde_yaml::from_str(text)?;
        check_version(FILE, file.version)?;

        let mut by_category = BTreeMap::new();
        for (category, rules) in file.roles {
            let compiled = rules
                .into_iter()
                .map(|rule| {
                    Ok(RoleRule {
                        role: rule.role,
                        label: rule.label,
                        pattern: compile(FILE, &rule.pattern)?,
                        exclude: rule
                            .exclude
                            .as_deref()
                            .map(|p| compile(FILE, p))
                            .transpose()?,
                    })
                })
                .collect::<Result<Vec<_>, RulesError>>()?;
            by_category.insert(category, compiled);
        }
        Ok(Self { by_category })
    }

    pub fn for_category(&self, category: Category) -> &[RoleRule] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub(crate) fn skill_table_from_yaml(text: &str) -> Result<SkillTable, RulesError> {
    let file: SkillRulesFile = serde_yaml::from_str(text)?;
    check_version("skills.yaml", file.version)?;
    let invariant_words = file
        .invariant_words
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .collect::<BTreeSet<_>>();
    SkillTable::new(file.remap, invariant_words)
}

/// Every rule table the normalizers and the aggregator consult.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub education: EducationRules,
    pub skills: SkillTable,
    pub roles: RoleRules,
}

impl RuleSet {
    /// Rules shipped in the workspace `rules/` directory, embedded at build time.
    pub fn builtin() -> Result<Self, RulesError> {
        Ok(Self {
            education: EducationRules::from_yaml(BUILTIN_EDUCATION)?,
            skills: skill_table_from_yaml(BUILTIN_SKILLS)?,
            roles: RoleRules::from_yaml(BUILTIN_ROLES)?,
        })
    }

    pub fn from_dir(rules_dir: &Path) -> anyhow::Result<Self> {
        let read = |name: &str| {
            let path = rules_dir.join(name);
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
        };
        Ok(Self {
            education: EducationRules::from_yaml(&read("education.yaml")?)
                .context("parsing rules/education.yaml")?,
            skills: skill_table_from_yaml(&read("skills.yaml")?).context("parsing rules/skills.yaml")?,
            roles: RoleRules::from_yaml(&read("roles.yaml")?).context("parsing rules/roles.yaml")?,
        })
    }
}
