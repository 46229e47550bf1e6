//! Position/duration explosion, date parsing and list reconciliation.

use chrono::NaiveDate;
use cprof_core::{Category, ExperienceRecord, PersonKey, RawExperienceRow};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::literal::parse_list_literal;

static DURATION_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec|Present|20[0-9]{2}|19[0-9]{2})")
        .expect("valid regex")
});

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperienceOptions {
    /// Date a `Present` end token resolves to (the scrape date).
    pub present_date: NaiveDate,
}

impl Default for ExperienceOptions {
    fn default() -> Self {
        Self {
            present_date: NaiveDate::from_ymd_opt(2022, 11, 1).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("{person_key}: {positions} positions cannot be paired with {durations} durations")]
    LengthMismatch {
        person_key: PersonKey,
        positions: usize,
        durations: usize,
    },
}

/// Keep the date-range items of a scraped duration list and strip the
/// `· 2 yrs 3 mos` length suffix from each.
pub fn extract_duration_tokens(items: &[String]) -> Vec<String> {
    items
        .iter()
        .filter(|item| DURATION_ITEM.is_match(item))
        .map(|item| {
            let cut = item.split("Â·").next().unwrap_or_default();
            cut.split('·').next().unwrap_or_default().trim().to_string()
        })
        .collect()
}

/// Truncate the longer of the two lists to the length of the shorter one.
/// Trailing positions without a duration are dropped.
pub fn reconcile_lengths(mut positions: Vec<String>, mut durations: Vec<String>) -> (Vec<String>, Vec<String>) {
    let len = positions.len().min(durations.len());
    positions.truncate(len);
    durations.truncate(len);
    (positions, durations)
}

/// Zip reconciled lists, refusing to silently drop entries.
pub fn pair_positions(
    person_key: PersonKey,
    positions: Vec<String>,
    durations: Vec<String>,
) -> Result<Vec<(String, String)>, PairingError> {
    if positions.len() != durations.len() {
        return Err(PairingError::LengthMismatch {
            person_key,
            positions: positions.len(),
            durations: durations.len(),
        });
    }
    Ok(positions.into_iter().zip(durations).collect())
}

/// `Mar 2019` resolves to the first of the month, `2019` to January 1st.
pub fn parse_date_token(token: &str) -> Option<NaiveDate> {
    let parts = token.split_whitespace().collect::<Vec<_>>();
    let (month, year) = match parts.as_slice() {
        [year] => (1, *year),
        [month, year] => {
            let prefix = month.get(..3)?.to_lowercase();
            let index = MONTHS.iter().position(|m| *m == prefix)?;
            (index as u32 + 1, *year)
        }
        _ => return None,
    };
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, 1)
}

/// Split a cleaned duration token into start and end dates. Either side
/// failing to parse nulls both.
pub fn parse_duration(token: &str, present: NaiveDate) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let parts = token
        .split(|c: char| c == '-' || c == '–')
        .map(str::trim)
        .collect::<Vec<_>>();
    let (start, end) = match parts.as_slice() {
        [start, end] => (*start, *end),
        [first, ..] => (*first, *first),
        [] => return (None, None),
    };

    let start = parse_date_token(start);
    let end = if end.eq_ignore_ascii_case("present") {
        Some(present)
    } else {
        parse_date_token(end)
    };
    match (start, end) {
        (Some(start), Some(end)) => (Some(start), Some(end)),
        _ => {
            debug!(token, "unparseable duration; dates left empty");
            (None, None)
        }
    }
}

/// Exploded experience rows plus counters for the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperienceBatch {
    pub records: Vec<ExperienceRecord>,
    pub mismatched_rows: usize,
    pub unparseable_lists: usize,
    pub null_date_rows: usize,
}

/// Explode every raw row into one record per (position, duration) pair.
/// Link metadata stays empty; the merger attaches it.
pub fn normalize_experience(
    rows: &[RawExperienceRow],
    category: Category,
    options: &ExperienceOptions,
) -> Result<ExperienceBatch, PairingError> {
    let mut batch = ExperienceBatch::default();

    for row in rows {
        let person_key = PersonKey::new(category, row.profile_id_dummy);
        let (Some(positions), Some(durations)) = (
            parse_list_literal(&row.positions),
            parse_list_literal(&row.durations),
        ) else {
            warn!(%person_key, company = %row.company, "unparseable positions or durations; kept with empty dates");
            batch.unparseable_lists += 1;
            batch.null_date_rows += 1;
            batch.records.push(ExperienceRecord {
                person_key,
                company: row.company.trim().to_string(),
                position: String::new(),
                duration: String::new(),
                start_date: None,
                end_date: None,
                names: None,
                profile_url: None,
                profile_heading: None,
            });
            continue;
        };
        let durations = extract_duration_tokens(&durations);

        if positions.len() != durations.len() {
            warn!(
                %person_key,
                positions = positions.len(),
                durations = durations.len(),
                "position/duration length mismatch; truncating to the shorter list"
            );
            batch.mismatched_rows += 1;
        }
        let (positions, durations) = reconcile_lengths(positions, durations);

        for (position, duration) in pair_positions(person_key, positions, durations)? {
            let (start_date, end_date) = parse_duration(&duration, options.present_date);
            if start_date.is_none() {
                batch.null_date_rows += 1;
            }
            batch.records.push(ExperienceRecord {
                person_key,
                company: row.company.trim().to_string(),
                position: position.trim().to_string(),
                duration,
                start_date,
                end_date,
                names: None,
                profile_url: None,
                profile_heading: None,
            });
        }
    }

    batch
        .records
        .sort_by(|a, b| a.person_key.cmp(&b.person_key).then_with(|| cmp_start(a, b)));
    Ok(batch)
}

fn cmp_start(a: &ExperienceRecord, b: &ExperienceRecord) -> std::cmp::Ordering {
    match (a.start_date, b.start_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn shorter_durations_truncate_positions() {
        let (positions, durations) = reconcile_lengths(strings(&["a", "b", "c"]), strings(&["x", "y"]));
        assert_eq!(positions, strings(&["a", "b"]));
        assert_eq!(durations, strings(&["x", "y"]));
    }

    #[test]
    fn longer_durations_are_truncated() {
        let (positions, durations) = reconcile_lengths(strings(&["a", "b"]), strings(&["x", "y", "z"]));
        assert_eq!(positions, strings(&["a", "b"]));
        assert_eq!(durations, strings(&["x", "y"]));
    }

    #[test]
    fn pairing_rejects_unequal_lists() {
        let key = PersonKey::new(Category::Executive, 3);
        let err = pair_positions(key, strings(&["a"]), strings(&[])).unwrap_err();
        assert_eq!(
            err,
            PairingError::LengthMismatch {
                person_key: key,
                positions: 1,
                durations: 0
            }
        );
        assert_eq!(pair_positions(key, strings(&["a"]), strings(&["x"])).unwrap().len(), 1);
    }

    #[test]
    fn duration_tokens_drop_locations_and_length_suffix() {
        let items = strings(&[
            "Jan 2020 - Present · 2 yrs 11 mos",
            "London, United Kingdom",
            "2015 - 2018Â·3 yrs",
            "Full-time",
        ]);
        assert_eq!(
            extract_duration_tokens(&items),
            strings(&["Jan 2020 - Present", "2015 - 2018"])
        );
    }

    #[test]
    fn date_tokens() {
        assert_eq!(parse_date_token("Mar 2019"), Some(ymd(2019, 3, 1)));
        assert_eq!(parse_date_token("September 2001"), Some(ymd(2001, 9, 1)));
        assert_eq!(parse_date_token("2011"), Some(ymd(2011, 1, 1)));
        assert_eq!(parse_date_token("Spring 2011"), None);
        assert_eq!(parse_date_token("201"), None);
        assert_eq!(parse_date_token(""), None);
    }

    #[test]
    fn durations_resolve_present_and_single_points() {
        let present = ymd(2022, 11, 1);
        assert_eq!(
            parse_duration("Jan 2020 - Present", present),
            (Some(ymd(2020, 1, 1)), Some(present))
        );
        assert_eq!(
            parse_duration("2015 – 2018", present),
            (Some(ymd(2015, 1, 1)), Some(ymd(2018, 1, 1)))
        );
        assert_eq!(
            parse_duration("Jun 2019", present),
            (Some(ymd(2019, 6, 1)), Some(ymd(2019, 6, 1)))
        );
        assert_eq!(
            parse_duration("May 2010 - Jun 2011 - Jul 2012", present),
            (Some(ymd(2010, 5, 1)), Some(ymd(2010, 5, 1)))
        );
        assert_eq!(parse_duration("Jan 2020 - sometime", present), (None, None));
    }

    #[test]
    fn rows_explode_and_keep_unparseable_dates() {
        let rows = vec![RawExperienceRow {
            profile_id_dummy: 4,
            company: " Acme ".into(),
            positions: "['Director', 'Manager', 'Intern']".into(),
            durations: "['Jan 2020 - Present · 2 yrs', 'Present tense - 2019', 'Seattle']".into(),
        }];
        let batch = normalize_experience(&rows, Category::Executive, &ExperienceOptions::default()).unwrap();

        assert_eq!(batch.mismatched_rows, 1);
        assert_eq!(batch.null_date_rows, 1);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].position, "Director");
        assert_eq!(batch.records[0].company, "Acme");
        assert_eq!(batch.records[0].end_date, Some(ymd(2022, 11, 1)));
        assert_eq!(batch.records[1].position, "Manager");
        assert_eq!(batch.records[1].date_span(), None);
        assert!(batch.records[1].names.is_none());
    }

    #[test]
    fn records_are_ordered_by_person_then_start() {
        let rows = vec![
            RawExperienceRow {
                profile_id_dummy: 1,
                company: "Later".into(),
                positions: "['B', 'A']".into(),
                durations: "['2018 - 2020', '2012 - 2016']".into(),
            },
            RawExperienceRow {
                profile_id_dummy: 0,
                company: "First".into(),
                positions: "['C']".into(),
                durations: "['2001 - 2003']".into(),
            },
        ];
        let batch = normalize_experience(&rows, Category::Technologist, &ExperienceOptions::default()).unwrap();
        let order = batch
            .records
            .iter()
            .map(|r| r.position.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["C", "A", "B"]);
    }

    #[test]
    fn unparseable_lists_keep_a_dateless_record() {
        let rows = vec![RawExperienceRow {
            profile_id_dummy: 0,
            company: " Acme ".into(),
            positions: "Director".into(),
            durations: "[]".into(),
        }];
        let batch = normalize_experience(&rows, Category::Consultant, &ExperienceOptions::default()).unwrap();
        assert_eq!(batch.unparseable_lists, 1);
        assert_eq!(batch.null_date_rows, 1);
        assert_eq!(batch.records.len(), 1);
        let record = &batch.records[0];
        assert_eq!(record.person_key, PersonKey::new(Category::Consultant, 0));
        assert_eq!(record.company, "Acme");
        assert_eq!(record.position, "");
        assert_eq!(record.date_span(), None);
    }

    #[test]
    fn escaped_non_breaking_space_before_length_suffix() {
        let rows = vec![RawExperienceRow {
            profile_id_dummy: 2,
            company: "Initech".into(),
            positions: r"['Principal\xa0Engineer']".into(),
            durations: r"['Jan 2020 - Present\xa0· 2 yrs 10 mos']".into(),
        }];
        let batch = normalize_experience(&rows, Category::Technologist, &ExperienceOptions::default()).unwrap();
        assert_eq!(batch.null_date_rows, 0);
        let record = &batch.records[0];
        assert_eq!(record.position, "Principal\u{a0}Engineer");
        assert_eq!(record.duration, "Jan 2020 - Present");
        assert_eq!(record.start_date, Some(ymd(2020, 1, 1)));
        assert_eq!(record.end_date, Some(ymd(2022, 11, 1)));
    }
}
