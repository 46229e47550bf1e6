//! Fragment loading + cleaned-table persistence for career-profile data.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use cprof_core::{ProfileLink, RawProfileLink};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cprof-storage";

/// Attribute a scraped fragment file covers, recognised by a filename substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Education,
    Experience,
    Skills,
}

impl FragmentKind {
    pub fn filename_filter(&self) -> &'static str {
        match self {
            Self::Education => "education",
            Self::Experience => "experience",
            Self::Skills => "skill",
        }
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("fragment directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
    #[error("profile-link table {} does not exist", .0.display())]
    MissingProfileLinks(PathBuf),
    #[error("listing fragment directory {}", .path.display())]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading table {}", .path.display())]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFragment {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub loaded: Vec<PathBuf>,
    pub skipped: Vec<SkippedFragment>,
}

impl LoadSummary {
    pub fn extend(&mut self, other: LoadSummary) {
        self.loaded.extend(other.loaded);
        self.skipped.extend(other.skipped);
    }
}

/// Concatenated rows of every readable fragment, plus what was skipped.
#[derive(Debug, Clone)]
pub struct FragmentTable<T> {
    pub rows: Vec<T>,
    pub summary: LoadSummary,
}

/// Sorted `.csv` files in `dir` whose name contains `filter`.
pub fn list_fragments(dir: &Path, filter: &str) -> Result<Vec<PathBuf>, LoaderError> {
    if !dir.is_dir() {
        return Err(LoaderError::MissingDirectory(dir.to_path_buf()));
    }
    let entries = fs::read_dir(dir).map_err(|source| LoaderError::ListDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|name| {
                    let name = name.to_string_lossy();
                    name.contains(filter) && name.ends_with(".csv")
                })
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

pub fn read_csv_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    reader.deserialize().collect()
}

/// Load and concatenate every fragment of `kind` under `dir`. A fragment that
/// cannot be read or decoded is skipped and reported in the summary; only a
/// missing directory is fatal.
pub fn load_fragments<T: DeserializeOwned>(
    dir: &Path,
    kind: FragmentKind,
) -> Result<FragmentTable<T>, LoaderError> {
    let paths = list_fragments(dir, kind.filename_filter())?;
    let mut rows = Vec::new();
    let mut summary = LoadSummary::default();

    for path in paths {
        match read_csv_rows::<T>(&path) {
            Ok(mut fragment_rows) => {
                debug!(path = %path.display(), rows = fragment_rows.len(), "loaded fragment");
                rows.append(&mut fragment_rows);
                summary.loaded.push(path);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable fragment");
                summary.skipped.push(SkippedFragment {
                    path,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(FragmentTable { rows, summary })
}

/// Concatenate raw link tables (each already cut to its row limit), drop rows
/// with an empty field and exact duplicates (first occurrence wins), and
/// assign a dense index.
pub fn clean_profile_links(sources: Vec<Vec<RawProfileLink>>) -> Vec<ProfileLink> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .flatten()
        .map(|link| RawProfileLink {
            names: link.names.trim().to_string(),
            profile_url: link.profile_url.trim().to_string(),
            profile_heading: link.profile_heading.trim().to_string(),
        })
        .filter(|link| {
            !link.names.is_empty() && !link.profile_url.is_empty() && !link.profile_heading.is_empty()
        })
        .filter(|link| seen.insert(link.clone()))
        .enumerate()
        .map(|(idx, link)| ProfileLink {
            profile_id_dummy: idx as u32,
            names: link.names,
            profile_url: link.profile_url,
            profile_heading: link.profile_heading,
        })
        .collect()
}

/// Read a raw link CSV, keeping at most `limit` rows.
pub fn read_raw_profile_links(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<RawProfileLink>, LoaderError> {
    if !path.is_file() {
        return Err(LoaderError::MissingProfileLinks(path.to_path_buf()));
    }
    let mut rows = read_csv_rows::<RawProfileLink>(path).map_err(|source| LoaderError::Table {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

/// Read a cleaned category profile-link table. Its absence stops the stage.
pub fn load_profile_links(path: &Path) -> Result<Vec<ProfileLink>, LoaderError> {
    if !path.is_file() {
        return Err(LoaderError::MissingProfileLinks(path.to_path_buf()));
    }
    read_csv_rows(path).map_err(|source| LoaderError::Table {
        path: path.to_path_buf(),
        source,
    })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Serialize typed rows to CSV bytes with a header derived from `T`.
pub fn rows_to_csv_bytes<T: Serialize>(rows: &[T]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("serializing csv row")?;
    }
    writer.into_inner().context("flushing csv buffer")
}

/// Serialize an explicit header + string records, for tables whose columns
/// are only known at runtime.
pub fn records_to_csv_bytes(header: &[String], records: &[Vec<String>]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header).context("writing csv header")?;
    for record in records {
        writer.write_record(record).context("writing csv record")?;
    }
    writer.into_inner().context("flushing csv buffer")
}

#[derive(Debug, Clone)]
pub struct StoredTable {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
}

/// Directory of cleaned tables, written whole via temp-file + rename so a
/// reader never observes a half-written table.
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, relative_path: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative_path)
    }

    pub async fn write_table(
        &self,
        relative_path: impl AsRef<Path>,
        bytes: &[u8],
    ) -> anyhow::Result<StoredTable> {
        let relative_path = relative_path.as_ref().to_path_buf();
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        tokio::fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating table directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp table file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp table file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp table file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = tokio::fs::rename(&temp_path, &absolute_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp table {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredTable {
            content_hash: sha256_hex(bytes),
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
        })
    }

    pub fn read_rows<T: DeserializeOwned>(
        &self,
        relative_path: impl AsRef<Path>,
    ) -> anyhow::Result<Vec<T>> {
        let path = self.root.join(relative_path);
        read_csv_rows(&path).with_context(|| format!("reading {}", path.display()))
    }

    /// Header and raw string records, for wide tables without a fixed row type.
    pub fn read_records(
        &self,
        relative_path: impl AsRef<Path>,
    ) -> anyhow::Result<(Vec<String>, Vec<Vec<String>>)> {
        let path = self.root.join(relative_path);
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        let header = reader
            .headers()
            .with_context(|| format!("reading header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();
        let records = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>, _>>()
            .with_context(|| format!("reading {}", path.display()))?;
        Ok((header, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cprof_core::RawExperienceRow;
    use tempfile::tempdir;

    fn raw_link(name: &str, url: &str, heading: &str) -> RawProfileLink {
        RawProfileLink {
            names: name.into(),
            profile_url: url.into(),
            profile_heading: heading.into(),
        }
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn corrupt_fragment_is_skipped_and_reported() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("0_experience.csv"),
            "profile_id_dummy,company,positions,durations\n0,Acme,\"['CTO']\",\"['Jan 2020 - Present']\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("1_experience.csv"),
            "profile_id_dummy,company,positions,durations\nnot-a-number,Acme,[],[]\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("2_experience.csv"),
            "profile_id_dummy,company,positions,durations\n2,Initech,\"['Lead']\",\"['2019 - 2020']\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("0_education.csv"), "profile_id_dummy\n0\n").unwrap();

        let table =
            load_fragments::<RawExperienceRow>(dir.path(), FragmentKind::Experience).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].company, "Acme");
        assert_eq!(table.rows[1].profile_id_dummy, 2);
        assert_eq!(table.summary.loaded.len(), 2);
        assert_eq!(table.summary.skipped.len(), 1);
        assert!(table.summary.skipped[0].path.ends_with("1_experience.csv"));
    }

    #[test]
    fn missing_fragment_directory_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let err = load_fragments::<RawExperienceRow>(&dir.path().join("nope"), FragmentKind::Experience)
            .unwrap_err();
        assert!(matches!(err, LoaderError::MissingDirectory(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn profile_links_drop_incomplete_and_duplicate_rows() {
        let cleaned = clean_profile_links(vec![
            vec![
                raw_link("Ada", "https://example.test/in/ada", "CTO"),
                raw_link("", "https://example.test/in/anon", "CTO"),
                raw_link("Ada", "https://example.test/in/ada", "CTO"),
            ],
            vec![raw_link("Grace", "https://example.test/in/grace", "CTO at Navy")],
        ]);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].profile_id_dummy, 0);
        assert_eq!(cleaned[1].names, "Grace");
        assert_eq!(cleaned[1].profile_id_dummy, 1);
    }

    #[test]
    fn raw_link_limit_truncates_rows() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("links.csv");
        fs::write(
            &path,
            "names,profile_url,profile_heading\na,u1,h\nb,u2,h\nc,u3,h\n",
        )
        .unwrap();
        assert_eq!(read_raw_profile_links(&path, Some(2)).unwrap().len(), 2);
        assert_eq!(read_raw_profile_links(&path, None).unwrap().len(), 3);
        assert!(matches!(
            read_raw_profile_links(&dir.path().join("missing.csv"), None),
            Err(LoaderError::MissingProfileLinks(_))
        ));
    }

    #[tokio::test]
    async fn table_store_writes_atomically_and_reads_back() {
        let dir = tempdir().expect("tempdir");
        let store = TableStore::new(dir.path());
        let links = vec![ProfileLink {
            profile_id_dummy: 0,
            names: "Ada".into(),
            profile_url: "https://example.test/in/ada".into(),
            profile_heading: "CTO".into(),
        }];
        let bytes = rows_to_csv_bytes(&links).unwrap();
        let stored = store
            .write_table("executive/executive_profile_links.csv", &bytes)
            .await
            .expect("write");
        assert!(stored.absolute_path.exists());
        assert_eq!(stored.content_hash, sha256_hex(&bytes));

        let back: Vec<ProfileLink> = store
            .read_rows("executive/executive_profile_links.csv")
            .unwrap();
        assert_eq!(back, links);

        let leftovers = fs::read_dir(dir.path().join("executive"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
