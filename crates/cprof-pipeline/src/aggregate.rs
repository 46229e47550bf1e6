//! Per-category rollups consumed by the presentation layer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use cprof_core::{
    Category, EducationRecord, ExperienceRecord, PersonEducation, PersonKey, SkillsMatrix,
};
use cprof_normalize::{person_education, RoleRules};
use serde::Serialize;

use crate::dataset::{Column, Dataset};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateOptions {
    pub history_cutoff: NaiveDate,
    pub outlier_sigmas: f64,
    pub experience_bin_months: u32,
    pub tenure_bin_months: u32,
    pub top_skills: usize,
}

/// Share of a category's people falling in one categorical value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelShare {
    pub category: Category,
    pub value: String,
    pub people: u32,
    pub percent_people: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopSkill {
    pub category: Category,
    pub skill_name: String,
    pub people: u32,
    pub percent_people: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBucket {
    pub category: Category,
    pub bucket_start: i64,
    pub bucket_end: i64,
    pub people: u32,
    pub percent_people: f64,
}

impl HistogramBucket {
    pub fn label(&self) -> String {
        format!("{}-{}", self.bucket_start, self.bucket_end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentCompany {
    pub person_key: PersonKey,
    pub company: String,
    pub months_at_company: i64,
    pub positions_at_company: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionShare {
    pub category: Category,
    pub positions: u32,
    pub people: u32,
    pub percent_people: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleShare {
    pub category: Category,
    pub role: String,
    pub held: bool,
    pub people: u32,
    pub percent_people: f64,
}

/// Thresholds of the population-wide outlier filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OutlierBounds {
    pub mean: f64,
    pub std_dev: f64,
    pub lower: f64,
    pub upper: f64,
    pub removed: usize,
}

/// `count / total * 100`, truncated.
pub fn percent_truncated(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (count * 100 / total) as u32
}

/// `count / total * 100` rounded half-to-even at `decimals` places.
pub fn percent_rounded(count: usize, total: usize, decimals: i32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let scale = 10f64.powi(decimals);
    (count as f64 / total as f64 * 100.0 * scale).round_ties_even() / scale
}

fn share_distribution(items: impl IntoIterator<Item = (Category, String)>) -> Vec<LevelShare> {
    let mut counts: BTreeMap<(Category, String), usize> = BTreeMap::new();
    let mut totals: BTreeMap<Category, usize> = BTreeMap::new();
    for (category, value) in items {
        *counts.entry((category, value)).or_default() += 1;
        *totals.entry(category).or_default() += 1;
    }

    let mut shares = counts
        .into_iter()
        .map(|((category, value), people)| LevelShare {
            category,
            percent_people: percent_truncated(people, totals[&category]),
            people: people as u32,
            value,
        })
        .collect::<Vec<_>>();
    shares.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then(b.percent_people.cmp(&a.percent_people))
            .then_with(|| a.value.cmp(&b.value))
    });
    shares
}

pub fn education_level_distribution(people: &[PersonEducation]) -> Vec<LevelShare> {
    share_distribution(
        people
            .iter()
            .map(|p| (p.person_key.category, p.highest_edu_level.label().to_string())),
    )
}

pub fn major_type_distribution(people: &[PersonEducation]) -> Vec<LevelShare> {
    share_distribution(
        people
            .iter()
            .map(|p| (p.person_key.category, p.major_types_label())),
    )
}

/// Months of prior experience per person. The rows ending on the person's
/// latest end date are the current role and are left out, as are rows
/// starting on or before `cutoff` and rows without dates. Rows sharing an end
/// date count once, from their earliest start.
pub fn person_experience_months(
    records: &[ExperienceRecord],
    cutoff: NaiveDate,
) -> BTreeMap<PersonKey, i64> {
    let mut spans: BTreeMap<PersonKey, Vec<(NaiveDate, NaiveDate)>> = BTreeMap::new();
    for record in records {
        if let Some(span) = record.date_span() {
            spans.entry(record.person_key).or_default().push(span);
        }
    }

    let mut totals = BTreeMap::new();
    for (person_key, spans) in spans {
        let latest_end = spans.iter().map(|(_, end)| *end).max();
        let mut by_end: BTreeMap<NaiveDate, NaiveDate> = BTreeMap::new();
        for (start, end) in spans {
            if start <= cutoff || Some(end) == latest_end {
                continue;
            }
            by_end
                .entry(end)
                .and_modify(|earliest| *earliest = (*earliest).min(start))
                .or_insert(start);
        }
        if by_end.is_empty() {
            continue;
        }
        let months = by_end
            .into_iter()
            .map(|(end, start)| (end - start).num_days() / 30)
            .sum();
        totals.insert(person_key, months);
    }
    totals
}

/// Drop people whose total lies outside `mean ± sigmas * std_dev` (population
/// standard deviation over everyone, one pass). Nothing is dropped when the
/// spread is zero.
pub fn trim_outliers(
    totals: BTreeMap<PersonKey, i64>,
    sigmas: f64,
) -> (BTreeMap<PersonKey, i64>, OutlierBounds) {
    let n = totals.len() as f64;
    if totals.is_empty() {
        return (totals, OutlierBounds::default());
    }
    let mean = totals.values().map(|v| *v as f64).sum::<f64>() / n;
    let variance = totals
        .values()
        .map(|v| (*v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();
    let mut bounds = OutlierBounds {
        mean,
        std_dev,
        lower: mean - sigmas * std_dev,
        upper: mean + sigmas * std_dev,
        removed: 0,
    };
    if std_dev == 0.0 {
        return (totals, bounds);
    }

    let before = totals.len();
    let kept = totals
        .into_iter()
        .filter(|(_, months)| {
            let months = *months as f64;
            months > bounds.lower && months < bounds.upper
        })
        .collect::<BTreeMap<_, _>>();
    bounds.removed = before - kept.len();
    (kept, bounds)
}

/// Fixed-width buckets per category; only non-empty buckets are emitted.
pub fn histogram(
    values: impl IntoIterator<Item = (Category, i64)>,
    bin_months: u32,
) -> Vec<HistogramBucket> {
    let width = i64::from(bin_months.max(1));
    let mut counts: BTreeMap<(Category, i64), usize> = BTreeMap::new();
    let mut totals: BTreeMap<Category, usize> = BTreeMap::new();
    for (category, months) in values {
        *counts
            .entry((category, months.div_euclid(width) * width))
            .or_default() += 1;
        *totals.entry(category).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((category, bucket_start), people)| HistogramBucket {
            category,
            bucket_start,
            bucket_end: bucket_start + width - 1,
            people: people as u32,
            percent_people: percent_rounded(people, totals[&category], 1),
        })
        .collect()
}

#[derive(Default)]
struct CompanySpan {
    latest_end: Option<NaiveDate>,
    earliest_start: Option<NaiveDate>,
    positions: BTreeSet<String>,
}

/// The company each person worked at most recently: the one holding the
/// person's latest end date. Ties go to the alphabetically first company name.
/// Tenure spans the earliest start to the latest end there, in 30-day months
/// rounded half-to-even.
pub fn current_companies(records: &[ExperienceRecord]) -> Vec<CurrentCompany> {
    let mut companies: BTreeMap<PersonKey, BTreeMap<&str, CompanySpan>> = BTreeMap::new();
    for record in records {
        let span = companies
            .entry(record.person_key)
            .or_default()
            .entry(record.company.as_str())
            .or_default();
        span.latest_end = span.latest_end.max(record.end_date);
        if let Some(start) = record.start_date {
            span.earliest_start = Some(span.earliest_start.map_or(start, |s| s.min(start)));
        }
        let position = record.position.trim();
        if !position.is_empty() {
            span.positions.insert(position.to_lowercase());
        }
    }

    let mut rows = Vec::new();
    for (person_key, spans) in companies {
        let mut best: Option<(&str, &CompanySpan)> = None;
        for (company, span) in &spans {
            if span.latest_end.is_none() {
                continue;
            }
            if best.map_or(true, |(_, b)| span.latest_end > b.latest_end) {
                best = Some((*company, span));
            }
        }
        let Some((company, span)) = best else {
            continue;
        };
        let (Some(start), Some(end)) = (span.earliest_start, span.latest_end) else {
            continue;
        };
        rows.push(CurrentCompany {
            person_key,
            company: company.to_string(),
            months_at_company: ((end - start).num_days() as f64 / 30.0).round_ties_even() as i64,
            positions_at_company: span.positions.len() as u32,
        });
    }
    rows
}

pub fn position_count_distribution(current: &[CurrentCompany]) -> Vec<PositionShare> {
    let mut counts: BTreeMap<(Category, u32), usize> = BTreeMap::new();
    let mut totals: BTreeMap<Category, usize> = BTreeMap::new();
    for row in current {
        let category = row.person_key.category;
        *counts.entry((category, row.positions_at_company)).or_default() += 1;
        *totals.entry(category).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((category, positions), people)| PositionShare {
            category,
            positions,
            people: people as u32,
            percent_people: percent_rounded(people, totals[&category], 1),
        })
        .collect()
}

/// For every role rule of a category, how many of the category's people ever
/// held a matching title (and how many never did).
pub fn role_flags(records: &[ExperienceRecord], roles: &RoleRules) -> Vec<RoleShare> {
    let mut titles: BTreeMap<PersonKey, Vec<&str>> = BTreeMap::new();
    for record in records {
        titles
            .entry(record.person_key)
            .or_default()
            .push(record.position.as_str());
    }

    let mut shares = Vec::new();
    for category in Category::ALL {
        let people = titles
            .iter()
            .filter(|(key, _)| key.category == category)
            .map(|(_, titles)| titles)
            .collect::<Vec<_>>();
        if people.is_empty() {
            continue;
        }
        for rule in roles.for_category(category) {
            let held = people
                .iter()
                .filter(|titles| titles.iter().any(|t| rule.matches(t)))
                .count();
            for (flag, count) in [(true, held), (false, people.len() - held)] {
                shares.push(RoleShare {
                    category,
                    role: rule.label.clone(),
                    held: flag,
                    people: count as u32,
                    percent_people: percent_rounded(count, people.len(), 1),
                });
            }
        }
    }
    shares
}

/// Most common skills per category, by people count then name.
pub fn top_skills(matrix: &SkillsMatrix, limit: usize) -> Vec<TopSkill> {
    let mut out = Vec::new();
    for category in Category::ALL {
        let rows = matrix
            .rows
            .iter()
            .filter(|r| r.person_key.category == category)
            .collect::<Vec<_>>();
        if rows.is_empty() {
            continue;
        }
        let mut counts = matrix
            .columns
            .iter()
            .map(|skill| {
                let people = rows.iter().filter(|r| r.skills.contains(skill)).count();
                (skill, people)
            })
            .filter(|(_, people)| *people > 0)
            .collect::<Vec<_>>();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        out.extend(counts.into_iter().take(limit).map(|(skill, people)| TopSkill {
            category,
            skill_name: skill.clone(),
            people: people as u32,
            percent_people: percent_rounded(people, rows.len(), 0) as u32,
        }));
    }
    out
}

/// Every derived dataset of one aggregate run.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregates {
    pub person_education: Vec<PersonEducation>,
    pub education_levels: Vec<LevelShare>,
    pub major_types: Vec<LevelShare>,
    pub experience_totals: BTreeMap<PersonKey, i64>,
    pub outliers: OutlierBounds,
    pub experience_histogram: Vec<HistogramBucket>,
    pub current_companies: Vec<CurrentCompany>,
    pub tenure_histogram: Vec<HistogramBucket>,
    pub positions_at_current_company: Vec<PositionShare>,
    pub role_flags: Vec<RoleShare>,
    pub top_skills: Vec<TopSkill>,
}

pub fn aggregate(
    education: &[EducationRecord],
    experience: &[ExperienceRecord],
    skills: &SkillsMatrix,
    roles: &RoleRules,
    options: &AggregateOptions,
) -> Aggregates {
    let person_education = person_education(education);
    let totals = person_experience_months(experience, options.history_cutoff);
    let (experience_totals, outliers) = trim_outliers(totals, options.outlier_sigmas);
    let current_companies = current_companies(experience);

    Aggregates {
        education_levels: education_level_distribution(&person_education),
        major_types: major_type_distribution(&person_education),
        experience_histogram: histogram(
            experience_totals.iter().map(|(k, v)| (k.category, *v)),
            options.experience_bin_months,
        ),
        tenure_histogram: histogram(
            current_companies
                .iter()
                .map(|c| (c.person_key.category, c.months_at_company)),
            options.tenure_bin_months,
        ),
        positions_at_current_company: position_count_distribution(&current_companies),
        role_flags: role_flags(experience, roles),
        top_skills: top_skills(skills, options.top_skills),
        person_education,
        experience_totals,
        outliers,
        current_companies,
    }
}

fn category_columns(
    categories: impl Iterator<Item = Category> + Clone,
    names: &BTreeMap<Category, String>,
) -> [(String, Column); 2] {
    let display = |c: Category| names.get(&c).cloned().unwrap_or_else(|| c.tag().to_string());
    [
        ("category".to_string(), Column::text(categories.clone().map(|c| c.tag()))),
        ("display_name".to_string(), Column::text(categories.map(display))),
    ]
}

fn histogram_dataset(name: &str, buckets: &[HistogramBucket], names: &BTreeMap<Category, String>) -> Dataset {
    let mut dataset = Dataset::new(name);
    dataset.columns.extend(category_columns(buckets.iter().map(|b| b.category), names));
    dataset
        .column("bucket", Column::text(buckets.iter().map(|b| b.label())))
        .column("bucket_start", Column::Int64(buckets.iter().map(|b| b.bucket_start).collect()))
        .column("people", Column::UInt32(buckets.iter().map(|b| b.people).collect()))
        .column(
            "percent_people",
            Column::Percent1(buckets.iter().map(|b| b.percent_people).collect()),
        )
}

fn share_dataset(name: &str, value_column: &str, shares: &[LevelShare], names: &BTreeMap<Category, String>) -> Dataset {
    let mut dataset = Dataset::new(name);
    dataset.columns.extend(category_columns(shares.iter().map(|s| s.category), names));
    dataset
        .column(value_column, Column::text(shares.iter().map(|s| s.value.as_str())))
        .column("people", Column::UInt32(shares.iter().map(|s| s.people).collect()))
        .column(
            "percent_people",
            Column::UInt32(shares.iter().map(|s| s.percent_people).collect()),
        )
}

impl Aggregates {
    /// The aggregate datasets in their published column layout.
    pub fn datasets(&self, names: &BTreeMap<Category, String>) -> Vec<Dataset> {
        let mut datasets = vec![
            share_dataset("education_level_distribution", "highest_edu_level", &self.education_levels, names),
            share_dataset("major_type_distribution", "major_type", &self.major_types, names),
        ];

        let people = &self.person_education;
        datasets.push(
            Dataset::new("person_education")
                .column("person_key", Column::text(people.iter().map(|p| p.person_key.to_string())))
                .column("category", Column::text(people.iter().map(|p| p.person_key.category.tag())))
                .column(
                    "highest_edu_level",
                    Column::text(people.iter().map(|p| p.highest_edu_level.label())),
                )
                .column("major_types", Column::text(people.iter().map(|p| p.major_types_label()))),
        );

        let mut top = Dataset::new("top_skills");
        top.columns.extend(category_columns(self.top_skills.iter().map(|s| s.category), names));
        datasets.push(
            top.column(
                "skill_name",
                Column::text(self.top_skills.iter().map(|s| s.skill_name.as_str())),
            )
            .column("people", Column::UInt32(self.top_skills.iter().map(|s| s.people).collect()))
            .column(
                "percent_people",
                Column::UInt32(self.top_skills.iter().map(|s| s.percent_people).collect()),
            ),
        );

        let totals = &self.experience_totals;
        datasets.push(
            Dataset::new("experience_totals")
                .column("person_key", Column::text(totals.keys().map(|k| k.to_string())))
                .column("category", Column::text(totals.keys().map(|k| k.category.tag())))
                .column("months_exp", Column::Int64(totals.values().copied().collect())),
        );
        datasets.push(histogram_dataset("experience_histogram", &self.experience_histogram, names));

        let current = &self.current_companies;
        datasets.push(
            Dataset::new("current_company")
                .column("person_key", Column::text(current.iter().map(|c| c.person_key.to_string())))
                .column("category", Column::text(current.iter().map(|c| c.person_key.category.tag())))
                .column("company", Column::text(current.iter().map(|c| c.company.as_str())))
                .column(
                    "months_at_company",
                    Column::Int64(current.iter().map(|c| c.months_at_company).collect()),
                )
                .column(
                    "positions_at_company",
                    Column::UInt32(current.iter().map(|c| c.positions_at_company).collect()),
                ),
        );
        datasets.push(histogram_dataset("tenure_histogram", &self.tenure_histogram, names));

        let positions = &self.positions_at_current_company;
        let mut position_dataset = Dataset::new("positions_at_current_company");
        position_dataset
            .columns
            .extend(category_columns(positions.iter().map(|p| p.category), names));
        datasets.push(
            position_dataset
                .column("positions", Column::UInt32(positions.iter().map(|p| p.positions).collect()))
                .column("people", Column::UInt32(positions.iter().map(|p| p.people).collect()))
                .column(
                    "percent_people",
                    Column::Percent1(positions.iter().map(|p| p.percent_people).collect()),
                ),
        );

        let roles = &self.role_flags;
        let mut role_dataset = Dataset::new("role_flags");
        role_dataset.columns.extend(category_columns(roles.iter().map(|r| r.category), names));
        datasets.push(
            role_dataset
                .column("role", Column::text(roles.iter().map(|r| r.role.as_str())))
                .column("held", Column::Flag(roles.iter().map(|r| r.held).collect()))
                .column("people", Column::UInt32(roles.iter().map(|r| r.people).collect()))
                .column(
                    "percent_people",
                    Column::Percent1(roles.iter().map(|r| r.percent_people).collect()),
                ),
        );

        datasets
    }
}
