//! Skill canonicalization: lowercase, lemmatize, fold synonyms, pivot.

use std::collections::{BTreeMap, BTreeSet};

use cprof_core::{Category, PersonKey, RawSkillsRow, SkillsMatrix, SkillsRow};
use tracing::warn;

use crate::literal::parse_list_literal;
use crate::rules::RulesError;

/// Immutable synonym table. Construction rejects tables where a remapped
/// name is itself remapped, so one application is always final.
#[derive(Debug, Clone)]
pub struct SkillTable {
    remap: BTreeMap<String, String>,
    invariant_words: BTreeSet<String>,
}

impl SkillTable {
    pub fn new(
        remap: BTreeMap<String, String>,
        invariant_words: BTreeSet<String>,
    ) -> Result<Self, RulesError> {
        let table = Self {
            remap: BTreeMap::new(),
            invariant_words,
        };

        for (key, value) in &remap {
            let normalized = table.lemmatize(key);
            if &normalized != key {
                return Err(RulesError::UnreachableKey {
                    key: key.clone(),
                    normalized,
                });
            }
            let normalized = table.lemmatize(value);
            if &normalized != value {
                return Err(RulesError::UnstableValue {
                    value: value.clone(),
                    normalized,
                });
            }
            if let Some(next) = remap.get(value) {
                if next != value {
                    return Err(RulesError::SkillRemapChain {
                        from: key.clone(),
                        via: value.clone(),
                        to: next.clone(),
                    });
                }
            }
        }

        Ok(Self { remap, ..table })
    }

    pub fn len(&self) -> usize {
        self.remap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remap.is_empty()
    }

    /// Lowercase, collapse whitespace, and reduce a single plural word to its
    /// singular form. Phrases are returned as-is.
    pub fn lemmatize(&self, raw: &str) -> String {
        let text = raw
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if text.contains(' ') || self.invariant_words.contains(&text) {
            return text;
        }
        singularize(&text)
    }

    pub fn remap<'a>(&'a self, lemma: &'a str) -> &'a str {
        self.remap.get(lemma).map(String::as_str).unwrap_or(lemma)
    }

    pub fn canonicalize(&self, raw: &str) -> String {
        let lemma = self.lemmatize(raw);
        self.remap(&lemma).to_string()
    }

    /// Deduplicated, sorted canonical names; blank entries are dropped.
    pub fn canonical_set(&self, raw_skills: &[String]) -> BTreeSet<String> {
        raw_skills
            .iter()
            .map(|s| self.canonicalize(s))
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn singularize(word: &str) -> String {
    let len = word.chars().count();
    if len <= 3 || !word.ends_with('s') {
        return word.to_string();
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    if len > 4 {
        if let Some(stem) = word.strip_suffix("ies") {
            return format!("{stem}y");
        }
    }
    if let Some(stem) = word.strip_suffix("sses") {
        return format!("{stem}ss");
    }
    for suffix in ["ches", "shes", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    word[..word.len() - 1].to_string()
}

/// Canonicalize every person's skill list and pivot into a presence matrix.
/// Several fragments for one person are merged; a person whose list cannot
/// be parsed keeps a row with no skills.
pub fn normalize_skills(rows: &[RawSkillsRow], category: Category, table: &SkillTable) -> SkillsMatrix {
    let mut by_person: BTreeMap<PersonKey, SkillsRow> = BTreeMap::new();

    for row in rows {
        let person_key = PersonKey::new(category, row.profile_id_dummy);
        let raw_skills = parse_list_literal(&row.skills_list).unwrap_or_else(|| {
            warn!(%person_key, "unparseable skills list; keeping person with no skills");
            Vec::new()
        });
        let skills = table.canonical_set(&raw_skills);

        by_person
            .entry(person_key)
            .and_modify(|existing| existing.skills.extend(skills.iter().cloned()))
            .or_insert_with(|| SkillsRow {
                person_key,
                all_skills_link: row.all_skills_link.clone(),
                skills_list: row.skills_list.clone(),
                skills: skills.clone(),
            });
    }

    SkillsMatrix::from_rows(by_person.into_values().collect())
}
