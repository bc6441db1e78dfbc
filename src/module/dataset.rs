//! Shared Vehicle Dataset
//!
//! One row per captured image, keyed by the image file name. Extraction
//! appends placeholder rows; classification merges its fields into existing
//! rows. Extraction and classification run as separate processes, so every
//! mutation holds the in-process mutex plus an advisory lock on the sidecar
//! `<dataset>.lock` file, and re-reads the backing file under both.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fs2::FileExt;

use crate::module::define::column;
use crate::module::error::{Error, Result};

/// Placeholder row written once per captured track.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub vehicle: String,
}

/// Fuel and emission estimate for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct FuelEstimate {
    pub fuel: String,
    pub consumption: f64,
    /// `(pollutant, amount)` in dataset column order.
    pub emissions: Vec<(String, f64)>,
}

/// Everything the classification pipeline learns about one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationFields {
    pub tier1: String,
    /// Empty unless the tier is the passenger car category.
    pub pc: String,
    /// `None` when the tier has no reference constants.
    pub estimate: Option<FuelEstimate>,
}

impl ClassificationFields {
    /// `(column, value)` pairs in the order their columns are introduced.
    pub fn cells(&self) -> Vec<(String, String)> {
        let mut cells = vec![
            (column::TIER1.to_string(), self.tier1.clone()),
            (column::PC.to_string(), self.pc.clone()),
        ];
        if let Some(est) = &self.estimate {
            cells.push((column::FUEL.to_string(), est.fuel.clone()));
            cells.push((
                column::FUEL_CONSUMPTION.to_string(),
                est.consumption.to_string(),
            ));
            for (pollutant, amount) in &est.emissions {
                cells.push((pollutant.clone(), amount.to_string()));
            }
        }
        cells
    }
}

/// Result of a classification upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Updated,
    /// No row for that file name; nothing was written.
    Missing,
    /// The row already carries classification fields; nothing was written.
    AlreadyClassified,
}

/// One dataset row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetRow {
    pub vehicle: String,
    values: HashMap<String, String>,
}

impl DatasetRow {
    pub fn new(vehicle: &str) -> Self {
        Self {
            vehicle: vehicle.to_string(),
            values: HashMap::new(),
        }
    }

    /// Cell value, empty when unset.
    pub fn get(&self, col: &str) -> &str {
        if col == column::VEHICLE {
            return &self.vehicle;
        }
        self.values.get(col).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, col: &str, value: String) {
        self.values.insert(col.to_string(), value);
    }

    /// Numeric cell, `None` when empty or not a number.
    pub fn number(&self, col: &str) -> Option<f64> {
        self.get(col).trim().parse().ok()
    }

    pub fn is_classified(&self) -> bool {
        !self.get(column::TIER1).is_empty()
    }

    fn record(&self, columns: &[String]) -> Vec<String> {
        columns.iter().map(|c| self.get(c).to_string()).collect()
    }
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<DatasetRow>,
    index: HashMap<String, usize>,
}

impl Table {
    fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut table = Table {
            columns,
            ..Default::default()
        };
        for record in reader.records() {
            let record = record?;
            let mut row = DatasetRow::new(record.get(0).unwrap_or(""));
            for (col, value) in table.columns.iter().zip(record.iter()).skip(1) {
                if !value.is_empty() {
                    row.set(col, value.to_string());
                }
            }
            if row.vehicle.is_empty() {
                continue;
            }
            table.index.insert(row.vehicle.clone(), table.rows.len());
            table.rows.push(row);
        }
        Ok(table)
    }

    fn write(&self, path: &Path) -> Result<()> {
        let tmp = tmp_path(path);
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(&self.columns)?;
            for row in &self.rows {
                writer.write_record(row.record(&self.columns))?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    sidecar(path, ".tmp")
}

/// Exclusive lock on `<dataset>.lock`, shared by every process using the dataset.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(dataset: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(sidecar(dataset, ".lock"))?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Rows and columns read straight from a dataset file, without creating it.
pub fn snapshot(path: &Path) -> Result<(Vec<String>, Vec<DatasetRow>)> {
    let table = Table::read(path)?;
    Ok((table.columns, table.rows))
}

/// The shared dataset file.
#[derive(Debug)]
pub struct DatasetStore {
    path: PathBuf,
    table: Mutex<Table>,
}

impl DatasetStore {
    /// Create the dataset with its base header if absent. Never truncates.
    ///
    /// Returns whether the file was created.
    pub fn ensure_initialized(path: &Path) -> Result<bool> {
        if path.is_file() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let _lock = FileLock::acquire(path)?;
        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(column::BASE)?;
        writer.flush()?;
        log::info!("Dataset created at {}", path.display());
        Ok(true)
    }

    /// Open the dataset, creating it first if needed.
    pub fn open(path: &Path) -> Result<Self> {
        Self::ensure_initialized(path)?;
        let table = {
            let _lock = FileLock::acquire(path)?;
            Table::read(path)?
        };
        log::debug!(
            "Dataset {} opened with {} rows",
            path.display(),
            table.rows.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take both locks and reload the file. Writers in any process are
    /// excluded until the returned guards drop.
    fn exclusive(&self) -> Result<(MutexGuard<'_, Table>, FileLock)> {
        let mut table = self.lock();
        let file_lock = FileLock::acquire(&self.path)?;
        *table = Table::read(&self.path)?;
        Ok((table, file_lock))
    }

    fn push_row(&self, table: &mut Table, vehicle: &str) -> Result<()> {
        let row = DatasetRow::new(vehicle);
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(row.record(&table.columns))?;
        writer.flush()?;

        let idx = table.rows.len();
        table.index.insert(vehicle.to_string(), idx);
        table.rows.push(row);
        Ok(())
    }

    /// Append a new placeholder row. The key must not exist yet.
    pub fn append(&self, record: &CaptureRecord) -> Result<()> {
        let (mut table, _file_lock) = self.exclusive()?;
        if table.index.contains_key(&record.vehicle) {
            return Err(Error::DuplicateKey(record.vehicle.clone()));
        }
        self.push_row(&mut table, &record.vehicle)
    }

    /// Append a placeholder row under the first name from `candidates` that
    /// no process has used yet. The check and the append happen under one lock.
    pub fn append_unique<F>(&self, mut candidates: F) -> Result<CaptureRecord>
    where
        F: FnMut() -> String,
    {
        let (mut table, _file_lock) = self.exclusive()?;
        let mut vehicle = candidates();
        while table.index.contains_key(&vehicle) {
            vehicle = candidates();
        }
        self.push_row(&mut table, &vehicle)?;
        Ok(CaptureRecord { vehicle })
    }

    /// Merge classification fields into the row for `vehicle`.
    ///
    /// An unknown file name is a silent no-op and leaves the file untouched.
    pub fn upsert_classification(
        &self,
        vehicle: &str,
        fields: &ClassificationFields,
    ) -> Result<Upsert> {
        let (mut table, _file_lock) = self.exclusive()?;
        let idx = match table.index.get(vehicle) {
            Some(idx) => *idx,
            None => {
                log::debug!("No dataset row for {}, update skipped", vehicle);
                return Ok(Upsert::Missing);
            }
        };
        if table.rows[idx].is_classified() {
            log::warn!("{} is already classified, update skipped", vehicle);
            return Ok(Upsert::AlreadyClassified);
        }

        for (col, value) in fields.cells() {
            if !table.columns.contains(&col) {
                table.columns.push(col.clone());
            }
            table.rows[idx].set(&col, value);
        }
        table.write(&self.path)?;
        Ok(Upsert::Updated)
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> Vec<String> {
        self.lock().columns.clone()
    }

    /// Snapshot of every row in file order.
    pub fn rows(&self) -> Vec<DatasetRow> {
        self.lock().rows.clone()
    }

    pub fn get(&self, vehicle: &str) -> Option<DatasetRow> {
        let table = self.lock();
        table.index.get(vehicle).map(|i| table.rows[*i].clone())
    }
}
