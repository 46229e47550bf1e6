//! Column-oriented output tables, rendered both as CSV (for the presentation
//! layer) and as parquet snapshots.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Utf8(Vec<Option<String>>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    /// Percentages, written with one decimal place.
    Percent1(Vec<f64>),
    /// Written as `0`/`1` in CSV.
    Flag(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Utf8(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Percent1(v) => v.len(),
            Self::Flag(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn text<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::Utf8(values.into_iter().map(|v| Some(v.into())).collect())
    }

    fn cell(&self, row: usize) -> String {
        match self {
            Self::Utf8(v) => v[row].clone().unwrap_or_default(),
            Self::UInt32(v) => v[row].to_string(),
            Self::Int64(v) => v[row].to_string(),
            Self::Percent1(v) => format!("{:.1}", v[row]),
            Self::Flag(v) => u8::from(v[row]).to_string(),
        }
    }

    fn arrow(&self) -> (DataType, bool, ArrayRef) {
        match self {
            Self::Utf8(v) => (
                DataType::Utf8,
                true,
                Arc::new(StringArray::from(v.iter().map(|s| s.as_deref()).collect::<Vec<_>>())),
            ),
            Self::UInt32(v) => (DataType::UInt32, false, Arc::new(UInt32Array::from(v.clone()))),
            Self::Int64(v) => (DataType::Int64, false, Arc::new(Int64Array::from(v.clone()))),
            Self::Percent1(v) => (DataType::Float64, false, Arc::new(Float64Array::from(v.clone()))),
            Self::Flag(v) => (DataType::Boolean, false, Arc::new(BooleanArray::from(v.clone()))),
        }
    }
}

/// A named output table. Every column has the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub columns: Vec<(String, Column)>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.push((name.into(), column));
        self
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    pub fn header(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    fn check_shape(&self) -> Result<()> {
        let rows = self.num_rows();
        if let Some((name, column)) = self.columns.iter().find(|(_, c)| c.len() != rows) {
            bail!(
                "dataset {}: column {name} has {} rows, expected {rows}",
                self.name,
                column.len()
            );
        }
        Ok(())
    }

    pub fn records(&self) -> Vec<Vec<String>> {
        (0..self.num_rows())
            .map(|row| self.columns.iter().map(|(_, c)| c.cell(row)).collect())
            .collect()
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        self.check_shape()?;
        cprof_storage::records_to_csv_bytes(&self.header(), &self.records())
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        self.check_shape()?;
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays = Vec::with_capacity(self.columns.len());
        for (name, column) in &self.columns {
            let (data_type, nullable, array) = column.arrow();
            fields.push(ArrowField::new(name, data_type, nullable));
            arrays.push(array);
        }
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .with_context(|| format!("building {} record batch", self.name))
    }
}

pub fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: cprof_storage::sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
