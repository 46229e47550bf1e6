//! Cross-category concatenation and the profile-link left join.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{bail, Context, Result};
use cprof_core::{Category, ExperienceRecord, PersonKey, ProfileLink, SkillsMatrix, SkillsRow};
use tracing::debug;

use crate::dataset::{Column, Dataset};

const SKILLS_FIXED_COLUMNS: [&str; 4] = ["person_key", "category", "all_skills_link", "skills_list"];

/// Attach name, URL and heading from the category's link table. Rows without
/// a link keep empty metadata. Returns how many rows found no link.
pub fn attach_profile_links(records: &mut [ExperienceRecord], links: &[ProfileLink]) -> usize {
    let by_id = links
        .iter()
        .map(|link| (link.profile_id_dummy, link))
        .collect::<HashMap<_, _>>();
    let mut unmatched = 0;
    for record in records.iter_mut() {
        match by_id.get(&record.person_key.index) {
            Some(link) => {
                record.names = Some(link.names.clone());
                record.profile_url = Some(link.profile_url.clone());
                record.profile_heading = Some(link.profile_heading.clone());
            }
            None => {
                debug!(person_key = %record.person_key, "experience row has no profile link");
                record.names = None;
                record.profile_url = None;
                record.profile_heading = None;
                unmatched += 1;
            }
        }
    }
    unmatched
}

/// Concatenate per-category tables in order. Every row's key must carry the
/// tag of the table it came from, which keeps keys unique across categories.
pub fn concat_tables<T>(
    tables: Vec<(Category, Vec<T>)>,
    key: impl Fn(&T) -> PersonKey,
) -> Result<Vec<T>> {
    let mut seen = HashSet::new();
    for (category, table) in &tables {
        if !seen.insert(*category) {
            bail!("category {category} was merged twice");
        }
        if let Some(stray) = table.iter().map(&key).find(|k| k.category != *category) {
            bail!("person {stray} found in the {category} table");
        }
    }
    Ok(tables.into_iter().flat_map(|(_, rows)| rows).collect())
}

/// Wide presence table: fixed columns then one 0/1 column per canonical skill.
pub fn skills_matrix_dataset(name: &str, matrix: &SkillsMatrix) -> Dataset {
    let rows = &matrix.rows;
    let mut dataset = Dataset::new(name)
        .column("person_key", Column::text(rows.iter().map(|r| r.person_key.to_string())))
        .column("category", Column::text(rows.iter().map(|r| r.person_key.category.tag())))
        .column("all_skills_link", Column::text(rows.iter().map(|r| r.all_skills_link.as_str())))
        .column("skills_list", Column::text(rows.iter().map(|r| r.skills_list.as_str())));
    for skill in &matrix.columns {
        dataset = dataset.column(
            skill.as_str(),
            Column::Flag(rows.iter().map(|r| r.skills.contains(skill)).collect()),
        );
    }
    dataset
}

/// Inverse of [`skills_matrix_dataset`] over CSV string records.
pub fn skills_matrix_from_records(header: &[String], records: &[Vec<String>]) -> Result<SkillsMatrix> {
    let fixed = SKILLS_FIXED_COLUMNS.len();
    if header.len() < fixed || header[..fixed] != SKILLS_FIXED_COLUMNS {
        bail!(
            "skills table header must start with {}",
            SKILLS_FIXED_COLUMNS.join(",")
        );
    }
    let skills = &header[fixed..];

    let mut rows = Vec::with_capacity(records.len());
    for (line, record) in records.iter().enumerate() {
        if record.len() != header.len() {
            bail!("skills record {} has {} fields, expected {}", line + 1, record.len(), header.len());
        }
        let person_key = record[0]
            .parse::<PersonKey>()
            .with_context(|| format!("skills record {}", line + 1))?;
        let present = skills
            .iter()
            .zip(&record[fixed..])
            .filter(|(_, flag)| matches!(flag.trim(), "1" | "1.0" | "true"))
            .map(|(skill, _)| skill.clone())
            .collect::<BTreeSet<_>>();
        rows.push(SkillsRow {
            person_key,
            all_skills_link: record[2].clone(),
            skills_list: record[3].clone(),
            skills: present,
        });
    }
    Ok(SkillsMatrix::from_rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(index: u32) -> ExperienceRecord {
        ExperienceRecord {
            person_key: PersonKey::new(Category::Consultant, index),
            company: "Acme".into(),
            position: "Analyst".into(),
            duration: String::new(),
            start_date: None,
            end_date: None,
            names: None,
            profile_url: None,
            profile_heading: None,
        }
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let links = vec![ProfileLink {
            profile_id_dummy: 0,
            names: "Ada".into(),
            profile_url: "https://example.test/in/ada".into(),
            profile_heading: "Partner".into(),
        }];
        let mut records = vec![job(0), job(1), job(0)];
        assert_eq!(attach_profile_links(&mut records, &links), 1);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].names.as_deref(), Some("Ada"));
        assert_eq!(records[1].names, None);
        assert_eq!(records[2].profile_heading.as_deref(), Some("Partner"));
    }

    #[test]
    fn concat_checks_category_of_every_row() {
        let consultants = vec![job(0), job(0), job(1)];
        let merged = concat_tables(vec![(Category::Consultant, consultants.clone())], |r| r.person_key);
        assert_eq!(merged.unwrap().len(), 3);

        let stray = concat_tables(vec![(Category::Executive, consultants.clone())], |r| r.person_key);
        assert!(stray.unwrap_err().to_string().contains("consultant_0"));

        let twice = concat_tables(
            vec![(Category::Consultant, consultants.clone()), (Category::Consultant, consultants)],
            |r| r.person_key,
        );
        assert!(twice.is_err());
    }

    #[test]
    fn skills_matrix_survives_csv_records() {
        let row = |category, index, skills: &[&str]| SkillsRow {
            person_key: PersonKey::new(category, index),
            all_skills_link: format!("https://example.test/{index}/skills"),
            skills_list: "[]".into(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
        };
        let matrix = SkillsMatrix::concat([
            SkillsMatrix::from_rows(vec![row(Category::Technologist, 0, &["python (programming language)"])]),
            SkillsMatrix::from_rows(vec![row(Category::Executive, 2, &["leadership", "sql"])]),
        ]);
        let dataset = skills_matrix_dataset("all_skills_info", &matrix);
        assert_eq!(dataset.header().len(), 4 + 3);
        assert_eq!(dataset.records()[0][4..], ["0", "1", "0"]);

        let back = skills_matrix_from_records(&dataset.header(), &dataset.records()).unwrap();
        assert_eq!(back, matrix);
    }

    #[test]
    fn skills_header_is_checked() {
        let header = vec!["profile_id_dummy".to_string(), "sql".to_string()];
        assert!(skills_matrix_from_records(&header, &[]).is_err());
    }
}
