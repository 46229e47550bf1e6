//! Degree/year parsing and person-level education rollups.

use std::collections::{BTreeMap, BTreeSet};

use cprof_core::{
    Category, DegreeFlags, EducationRecord, MajorType, PersonEducation, PersonKey,
    RawEducationRow, SENTINEL_YEAR,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::literal::parse_list_literal;
use crate::rules::EducationRules;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("valid regex"));
static YEARISH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9\-–]").expect("valid regex"));

/// Degree name plus year range extracted from one scraped degree list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDegree {
    pub degree_name: String,
    pub start_year: i32,
    pub end_year: i32,
}

impl ParsedDegree {
    pub fn sentinel() -> Self {
        Self {
            degree_name: String::new(),
            start_year: SENTINEL_YEAR,
            end_year: SENTINEL_YEAR,
        }
    }
}

fn first_number(text: &str) -> Option<i32> {
    DIGIT_RUN.find(text.trim())?.as_str().parse().ok()
}

/// Parse `2015 - 2019` into `(2015, 2019)`; a range without a dash repeats
/// its single year. `None` when either side has no digits.
pub fn parse_year_range(period: &str) -> Option<(i32, i32)> {
    let parts = period.split(|c: char| c == '-' || c == '–').collect::<Vec<_>>();
    match parts.as_slice() {
        [single] => first_number(single).map(|year| (year, year)),
        [start, end, ..] => Some((first_number(start)?, first_number(end)?)),
        [] => None,
    }
}

/// Interpret the items of one degree list. A single item is either a year
/// range (leading digit or dash) or a degree name; with two or more items
/// the first is the name and the second the range. `None` on parse failure.
pub fn parse_degree_items(items: &[String]) -> Option<ParsedDegree> {
    let (degree_name, period) = match items {
        [] => return None,
        [only] if YEARISH.is_match(only.trim()) => (String::new(), only.trim()),
        [only] => (only.trim().to_string(), ""),
        [name, period, ..] => (name.trim().to_string(), period.trim()),
    };
    let degree_name = degree_name.to_lowercase();

    if period.is_empty() {
        return Some(ParsedDegree {
            degree_name,
            start_year: SENTINEL_YEAR,
            end_year: SENTINEL_YEAR,
        });
    }

    let (start_year, end_year) = parse_year_range(period)?;
    Some(ParsedDegree {
        degree_name,
        start_year,
        end_year,
    })
}

/// Parse a raw `degree_list` cell, falling back to the sentinel triple.
pub fn parse_degree_list(raw: &str) -> ParsedDegree {
    parse_list_literal(raw)
        .and_then(|items| parse_degree_items(&items))
        .unwrap_or_else(|| {
            debug!(raw, "unusable degree entry; substituting sentinel");
            ParsedDegree::sentinel()
        })
}

/// One clean education record per raw row, ordered by person.
pub fn normalize_education(
    rows: &[RawEducationRow],
    category: Category,
    rules: &EducationRules,
) -> Vec<EducationRecord> {
    let mut records = rows
        .iter()
        .map(|row| {
            let parsed = parse_degree_list(&row.degree_list);
            let flags = rules.classify_degree(&parsed.degree_name);
            EducationRecord {
                person_key: PersonKey::new(category, row.profile_id_dummy),
                education_institute: row.education_institute.trim().to_string(),
                major_type: rules.classify_major(&parsed.degree_name),
                degree_name: parsed.degree_name,
                start_year_degree: parsed.start_year,
                end_year_degree: parsed.end_year,
                degree_bachelor: flags.bachelor,
                degree_master: flags.master,
                degree_mba: flags.mba,
                degree_doctorate: flags.doctorate,
            }
        })
        .collect::<Vec<_>>();
    records.sort_by_key(|r| r.person_key);
    records
}

/// Highest level (over the union of every record's flags) and the distinct
/// major families of each person.
pub fn person_education(records: &[EducationRecord]) -> Vec<PersonEducation> {
    let mut by_person: BTreeMap<PersonKey, (DegreeFlags, BTreeSet<MajorType>)> = BTreeMap::new();
    for record in records {
        let entry = by_person.entry(record.person_key).or_default();
        entry.0 = entry.0.union(record.flags());
        if let Some(major) = record.major_type {
            entry.1.insert(major);
        }
    }
    by_person
        .into_iter()
        .map(|(person_key, (flags, majors))| PersonEducation {
            person_key,
            highest_edu_level: flags.highest(),
            major_types: majors.into_iter().collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSet;
    use cprof_core::EduLevel;
    use proptest::prelude::*;

    fn items(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn raw(id: u32, degree_list: &str) -> RawEducationRow {
        RawEducationRow {
            profile_id_dummy: id,
            education_institute: "Some University".into(),
            degree_list: degree_list.into(),
        }
    }

    #[test]
    fn year_ranges() {
        assert_eq!(parse_year_range("2015-2019"), Some((2015, 2019)));
        assert_eq!(parse_year_range("2015 - 2019"), Some((2015, 2019)));
        assert_eq!(parse_year_range("Aug 2015 – May 2019"), Some((2015, 2019)));
        assert_eq!(parse_year_range("2015"), Some((2015, 2015)));
        assert_eq!(parse_year_range("Expected 2021"), Some((2021, 2021)));
        assert_eq!(parse_year_range("Spring - Fall"), None);
    }

    #[test]
    fn single_item_is_either_range_or_name() {
        assert_eq!(
            parse_degree_items(&items(&["2010 - 2014"])),
            Some(ParsedDegree {
                degree_name: String::new(),
                start_year: 2010,
                end_year: 2014
            })
        );
        assert_eq!(
            parse_degree_items(&items(&["Bachelor of Arts"])),
            Some(ParsedDegree {
                degree_name: "bachelor of arts".into(),
                start_year: SENTINEL_YEAR,
                end_year: SENTINEL_YEAR
            })
        );
    }

    #[test]
    fn two_items_are_name_then_range() {
        assert_eq!(
            parse_degree_items(&items(&["  B.Tech Computer Science ", "2010 - 2014", "Grade: A"])),
            Some(ParsedDegree {
                degree_name: "b.tech computer science".into(),
                start_year: 2010,
                end_year: 2014
            })
        );
    }

    #[test]
    fn failures_collapse_to_sentinel() {
        assert_eq!(parse_degree_list("[]"), ParsedDegree::sentinel());
        assert_eq!(parse_degree_list("garbage"), ParsedDegree::sentinel());
        assert_eq!(parse_degree_list("['MBA', 'sometime']"), ParsedDegree::sentinel());
    }

    #[test]
    fn end_to_end_highest_levels() {
        let rules = RuleSet::builtin().unwrap().education;
        let rows = vec![
            raw(2, "['PhD', '2018-2022']"),
            raw(0, "['B.Tech Computer Science', '2010-2014']"),
            raw(1, "['Master of Business Administration', '2015-2017']"),
        ];
        let records = normalize_education(&rows, Category::Technologist, &rules);
        assert_eq!(records[0].person_key.index, 0);
        assert_eq!(records[0].major_type, Some(MajorType::Stem));
        assert_eq!((records[2].start_year_degree, records[2].end_year_degree), (2018, 2022));

        let levels = person_education(&records)
            .into_iter()
            .map(|p| p.highest_edu_level)
            .collect::<Vec<_>>();
        assert_eq!(levels, vec![EduLevel::Bachelor, EduLevel::Mba, EduLevel::PhD]);
    }

    #[test]
    fn escaped_non_breaking_space_still_classifies() {
        let rules = RuleSet::builtin().unwrap().education;
        let parsed = parse_degree_list(r"['B.Tech\xa0Computer Science\xa0', '2010 - 2014']");
        assert_eq!(parsed.degree_name, "b.tech\u{a0}computer science");
        assert_eq!((parsed.start_year, parsed.end_year), (2010, 2014));

        let flags = rules.classify_degree(&parsed.degree_name);
        assert!(flags.bachelor);
        assert_eq!(flags.highest(), EduLevel::Bachelor);
        assert_eq!(rules.classify_major(&parsed.degree_name), Some(MajorType::Stem));
    }

    #[test]
    fn person_level_union_prefers_doctorate_and_keeps_all_majors() {
        let rules = RuleSet::builtin().unwrap().education;
        let rows = vec![
            raw(7, "['Bachelor of Engineering', '2001 - 2005']"),
            raw(7, "['Ph.D., Economics', '2006 - 2011']"),
            raw(7, "['Certificate', '2012']"),
        ];
        let records = normalize_education(&rows, Category::Executive, &rules);
        let people = person_education(&records);
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].highest_edu_level, EduLevel::PhD);
        assert_eq!(
            people[0].major_types,
            vec![MajorType::Engineering, MajorType::BusinessEconomics]
        );
    }

    proptest! {
        #[test]
        fn degree_parsing_never_panics(text in ".{0,40}") {
            let parsed = parse_degree_list(&text);
            prop_assert!(parsed.start_year >= 0 || parsed.start_year == SENTINEL_YEAR);
        }
    }
}
