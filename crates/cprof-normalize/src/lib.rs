//! Normalizers turning scraped free-text fragments into clean rows.

pub mod education;
pub mod experience;
pub mod literal;
pub mod rules;
pub mod skills;

pub use education::{normalize_education, parse_degree_list, person_education, ParsedDegree};
pub use experience::{
    normalize_experience, pair_positions, parse_duration, reconcile_lengths, ExperienceBatch,
    ExperienceOptions, PairingError,
};
pub use literal::parse_list_literal;
pub use rules::{EducationRules, RoleRule, RoleRules, RuleSet, RulesError, RULES_VERSION};
pub use skills::{normalize_skills, SkillTable};

pub const CRATE_NAME: &str = "cprof-normalize";
