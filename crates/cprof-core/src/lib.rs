//! Core domain model for career-profile normalization.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "cprof-core";

/// Year substituted for both ends of an education entry that could not be parsed.
pub const SENTINEL_YEAR: i32 = 1900;

/// Label used for people whose degrees match no major family.
pub const OTHER_MAJOR_LABEL: &str = "Other";

/// Professional cohort a scraped profile belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Technologist,
    Consultant,
    Executive,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Technologist,
        Category::Consultant,
        Category::Executive,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Technologist => "technologist",
            Self::Consultant => "consultant",
            Self::Executive => "executive",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("person key `{0}` has no category separator")]
    MissingSeparator(String),
    #[error("unknown category tag `{0}`")]
    UnknownCategory(String),
    #[error("person key `{key}` has a non-numeric index")]
    BadIndex { key: String },
}

/// Globally unique person identifier: category tag plus the row index of the
/// person in that category's profile-link table, rendered as `tag_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersonKey {
    pub category: Category,
    pub index: u32,
}

impl PersonKey {
    pub fn new(category: Category, index: u32) -> Self {
        Self { category, index }
    }
}

impl fmt::Display for PersonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.category.tag(), self.index)
    }
}

impl FromStr for PersonKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, index) = s
            .split_once('_')
            .ok_or_else(|| KeyParseError::MissingSeparator(s.to_string()))?;
        let category =
            Category::from_tag(tag).ok_or_else(|| KeyParseError::UnknownCategory(tag.to_string()))?;
        let index = index
            .parse()
            .map_err(|_| KeyParseError::BadIndex { key: s.to_string() })?;
        Ok(Self { category, index })
    }
}

impl TryFrom<String> for PersonKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PersonKey> for String {
    fn from(key: PersonKey) -> Self {
        key.to_string()
    }
}

/// One row of a cleaned category profile-link table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileLink {
    pub profile_id_dummy: u32,
    pub names: String,
    pub profile_url: String,
    pub profile_heading: String,
}

/// Link row as scraped, before cleaning assigns an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawProfileLink {
    #[serde(default)]
    pub names: String,
    #[serde(default)]
    pub profile_url: String,
    #[serde(default)]
    pub profile_heading: String,
}

/// Raw education fragment row; `degree_list` is a textual list literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEducationRow {
    pub profile_id_dummy: u32,
    #[serde(default)]
    pub education_institute: String,
    #[serde(default)]
    pub degree_list: String,
}

/// Raw experience fragment row; `positions` and `durations` are list literals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExperienceRow {
    pub profile_id_dummy: u32,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub positions: String,
    #[serde(default)]
    pub durations: String,
}

/// Raw skills fragment row; `skills_list` is a list literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSkillsRow {
    pub profile_id_dummy: u32,
    #[serde(default)]
    pub all_skills_link: String,
    #[serde(default)]
    pub skills_list: String,
}

/// Highest education level, declared in priority order (best first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EduLevel {
    PhD,
    #[serde(rename = "MBA")]
    Mba,
    Master,
    Bachelor,
    Other,
}

impl EduLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PhD => "PhD",
            Self::Mba => "MBA",
            Self::Master => "Master",
            Self::Bachelor => "Bachelor",
            Self::Other => "Other",
        }
    }
}

/// Independent degree-level matches for one degree (or the union over a person).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegreeFlags {
    pub bachelor: bool,
    pub master: bool,
    pub mba: bool,
    pub doctorate: bool,
}

impl DegreeFlags {
    pub fn union(self, other: Self) -> Self {
        Self {
            bachelor: self.bachelor || other.bachelor,
            master: self.master || other.master,
            mba: self.mba || other.mba,
            doctorate: self.doctorate || other.doctorate,
        }
    }

    pub fn highest(&self) -> EduLevel {
        if self.doctorate {
            EduLevel::PhD
        } else if self.mba {
            EduLevel::Mba
        } else if self.master {
            EduLevel::Master
        } else if self.bachelor {
            EduLevel::Bachelor
        } else {
            EduLevel::Other
        }
    }
}

/// Major family inferred from degree text, declared in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MajorType {
    Engineering,
    BusinessEconomics,
    Stem,
}

impl MajorType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Engineering => "Engineering",
            Self::BusinessEconomics => "Business/Economics",
            Self::Stem => "STEM (Non-Engineering)",
        }
    }
}

/// One degree entry of a person. Flags are stored flat so the row maps onto
/// a single CSV record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducationRecord {
    pub person_key: PersonKey,
    pub education_institute: String,
    pub degree_name: String,
    pub start_year_degree: i32,
    pub end_year_degree: i32,
    pub degree_bachelor: bool,
    pub degree_master: bool,
    pub degree_mba: bool,
    pub degree_doctorate: bool,
    pub major_type: Option<MajorType>,
}

impl EducationRecord {
    pub fn flags(&self) -> DegreeFlags {
        DegreeFlags {
            bachelor: self.degree_bachelor,
            master: self.degree_master,
            mba: self.degree_mba,
            doctorate: self.degree_doctorate,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.start_year_degree == SENTINEL_YEAR && self.end_year_degree == SENTINEL_YEAR
    }
}

/// Person-level education rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonEducation {
    pub person_key: PersonKey,
    pub highest_edu_level: EduLevel,
    /// Sorted, deduplicated; empty means "Other".
    pub major_types: Vec<MajorType>,
}

impl PersonEducation {
    pub fn major_types_label(&self) -> String {
        if self.major_types.is_empty() {
            return OTHER_MAJOR_LABEL.to_string();
        }
        self.major_types
            .iter()
            .map(|m| m.label())
            .collect::<Vec<_>>()
            .join(" & ")
    }
}

/// One position held at one company. Metadata fields come from the left join
/// against the profile-link table and stay `None` when the person has no link row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub person_key: PersonKey,
    pub company: String,
    pub position: String,
    pub duration: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub names: Option<String>,
    pub profile_url: Option<String>,
    pub profile_heading: Option<String>,
}

impl ExperienceRecord {
    /// Both dates, or `None` when either side failed to parse.
    pub fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.start_date?, self.end_date?))
    }
}

/// Canonical skills of one person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillsRow {
    pub person_key: PersonKey,
    pub all_skills_link: String,
    pub skills_list: String,
    pub skills: BTreeSet<String>,
}

/// Wide person x skill presence table. Columns are the sorted union of
/// every canonical skill across all rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkillsMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<SkillsRow>,
}

impl SkillsMatrix {
    pub fn from_rows(rows: Vec<SkillsRow>) -> Self {
        let columns = rows
            .iter()
            .flat_map(|r| r.skills.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self { columns, rows }
    }

    pub fn concat(matrices: impl IntoIterator<Item = SkillsMatrix>) -> Self {
        Self::from_rows(matrices.into_iter().flat_map(|m| m.rows).collect())
    }

    /// Presence flags of `row` aligned with `self.columns`; absent skills are `false`.
    pub fn presence(&self, row: &SkillsRow) -> Vec<bool> {
        self.columns.iter().map(|c| row.skills.contains(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_key_roundtrips_through_string() {
        let key = PersonKey::new(Category::Consultant, 42);
        assert_eq!(key.to_string(), "consultant_42");
        assert_eq!("consultant_42".parse::<PersonKey>().unwrap(), key);
        assert_eq!(
            "director_1".parse::<PersonKey>(),
            Err(KeyParseError::UnknownCategory("director".into()))
        );
        assert!(matches!(
            "executive_x".parse::<PersonKey>(),
            Err(KeyParseError::BadIndex { .. })
        ));
    }

    #[test]
    fn category_tags_do_not_contain_each_other() {
        for a in Category::ALL {
            for b in Category::ALL {
                if a != b {
                    assert!(!a.tag().contains(b.tag()));
                    assert!(!a.tag().contains('_'));
                }
            }
        }
    }

    #[test]
    fn highest_level_follows_priority() {
        let bachelor = DegreeFlags {
            bachelor: true,
            ..Default::default()
        };
        let doctorate = DegreeFlags {
            doctorate: true,
            ..Default::default()
        };
        assert_eq!(bachelor.union(doctorate).highest(), EduLevel::PhD);
        assert_eq!(
            DegreeFlags {
                master: true,
                mba: true,
                ..Default::default()
            }
            .highest(),
            EduLevel::Mba
        );
        assert_eq!(DegreeFlags::default().highest(), EduLevel::Other);
    }

    #[test]
    fn skills_matrix_fills_absent_with_false() {
        let row = |i, skills: &[&str]| SkillsRow {
            person_key: PersonKey::new(Category::Technologist, i),
            all_skills_link: String::new(),
            skills_list: String::new(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
        };
        let matrix = SkillsMatrix::from_rows(vec![row(0, &["sql", "agile"]), row(1, &[])]);
        assert_eq!(matrix.columns, vec!["agile".to_string(), "sql".to_string()]);
        assert_eq!(matrix.presence(&matrix.rows[0]), vec![true, true]);
        assert_eq!(matrix.presence(&matrix.rows[1]), vec![false, false]);
    }

    #[test]
    fn major_label_joins_sorted_types() {
        let edu = PersonEducation {
            person_key: PersonKey::new(Category::Executive, 3),
            highest_edu_level: EduLevel::Master,
            major_types: vec![MajorType::Engineering, MajorType::BusinessEconomics],
        };
        assert_eq!(edu.major_types_label(), "Engineering & Business/Economics");
        assert_eq!(
            serde_json::to_string(&EduLevel::Mba).unwrap(),
            "\"MBA\""
        );
    }
}
