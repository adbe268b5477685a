//! Persistence of inspection results.
//!
//! One record per cycle: timestamp, overall result, the check rows and an
//! image of the inspected sheet.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::imageops::FilterType;
use loomqc_pipeline::{CheckRow, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Stored images are shrunk by this factor in each direction.
const IMAGE_REDUCTION: u32 = 4;

/// A persisted inspection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub id: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub result: bool,
    pub rows: Vec<CheckRow>,
}

/// Storage backend for cycle records.
pub trait ResultStore: Send {
    /// Store one cycle and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record or image cannot be written.
    fn insert(
        &mut self,
        timestamp: SystemTime,
        passed: bool,
        rows: &[CheckRow],
        image: &RgbImage,
    ) -> Result<u64, StoreError>;

    /// Records with `since <= timestamp <= until`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the records cannot be read.
    fn query(&self, since: SystemTime, until: SystemTime) -> Result<Vec<CycleRecord>, StoreError>;

    /// The stored image of record `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    fn fetch_image(&self, id: u64) -> Result<RgbImage, StoreError>;

    /// The newest `n` records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the records cannot be read.
    fn last(&self, n: usize) -> Result<Vec<CycleRecord>, StoreError>;
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn shrink(image: &RgbImage) -> RgbImage {
    let width = (image.width() / IMAGE_REDUCTION).max(1);
    let height = (image.height() / IMAGE_REDUCTION).max(1);
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

fn in_range(record: &CycleRecord, since: SystemTime, until: SystemTime) -> bool {
    (unix_seconds(since)..=unix_seconds(until)).contains(&record.timestamp)
}

/// Append-only JSON-lines store with one JPEG per record.
///
/// Layout: `<dir>/records.jsonl` and `<dir>/images/<id>.jpg`.
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    next_id: u64,
}

impl JsonlStore {
    /// Open or create a store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created or the
    /// existing records cannot be read.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir.join("images"))?;
        let mut store = Self {
            dir: dir.to_owned(),
            next_id: 1,
        };
        store.next_id = store.records()?.last().map_or(1, |r| r.id + 1);
        debug!(dir = %dir.display(), next_id = store.next_id, "opened result store");
        Ok(store)
    }

    fn records_path(&self) -> PathBuf {
        self.dir.join("records.jsonl")
    }

    fn image_path(&self, id: u64) -> PathBuf {
        self.dir.join("images").join(format!("{id}.jpg"))
    }

    fn append(&self, line: &str) -> Result<(), StoreError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.records_path())?
            .write_all(line.as_bytes())?;
        Ok(())
    }

    fn records(&self) -> Result<Vec<CycleRecord>, StoreError> {
        let file = match File::open(self.records_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl ResultStore for JsonlStore {
    fn insert(
        &mut self,
        timestamp: SystemTime,
        passed: bool,
        rows: &[CheckRow],
        image: &RgbImage,
    ) -> Result<u64, StoreError> {
        let record = CycleRecord {
            id: self.next_id,
            timestamp: unix_seconds(timestamp),
            result: passed,
            rows: rows.to_vec(),
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let image_path = self.image_path(record.id);
        shrink(image).save_with_format(&image_path, image::ImageFormat::Jpeg)?;

        // An image without a record line would be overwritten by the next
        // insert under the same id.
        if let Err(e) = self.append(&line) {
            if let Err(cleanup) = std::fs::remove_file(&image_path) {
                warn!(path = %image_path.display(), error = %cleanup, "failed to remove orphaned image");
            }
            return Err(e);
        }

        self.next_id += 1;
        debug!(id = record.id, result = passed, "stored cycle");
        Ok(record.id)
    }

    fn query(&self, since: SystemTime, until: SystemTime) -> Result<Vec<CycleRecord>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| in_range(r, since, until))
            .collect())
    }

    fn fetch_image(&self, id: u64) -> Result<RgbImage, StoreError> {
        let path = self.image_path(id);
        if !path.is_file() {
            return Err(StoreError::NotFound(id));
        }
        Ok(image::open(path)?.to_rgb8())
    }

    fn last(&self, n: usize) -> Result<Vec<CycleRecord>, StoreError> {
        Ok(self.records()?.into_iter().rev().take(n).collect())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<(CycleRecord, RgbImage)>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest first.
    pub fn records(&self) -> impl DoubleEndedIterator<Item = &CycleRecord> {
        self.records.iter().map(|(record, _)| record)
    }
}

impl ResultStore for MemoryStore {
    fn insert(
        &mut self,
        timestamp: SystemTime,
        passed: bool,
        rows: &[CheckRow],
        image: &RgbImage,
    ) -> Result<u64, StoreError> {
        let id = self.records.last().map_or(1, |(r, _)| r.id + 1);
        let record = CycleRecord {
            id,
            timestamp: unix_seconds(timestamp),
            result: passed,
            rows: rows.to_vec(),
        };
        self.records.push((record, shrink(image)));
        Ok(id)
    }

    fn query(&self, since: SystemTime, until: SystemTime) -> Result<Vec<CycleRecord>, StoreError> {
        Ok(self
            .records()
            .filter(|r| in_range(r, since, until))
            .cloned()
            .collect())
    }

    fn fetch_image(&self, id: u64) -> Result<RgbImage, StoreError> {
        self.records
            .iter()
            .find(|(r, _)| r.id == id)
            .map(|(_, image)| image.clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn last(&self, n: usize) -> Result<Vec<CycleRecord>, StoreError> {
        Ok(self.records().rev().take(n).cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn rows(passed: bool) -> Vec<CheckRow> {
        vec![CheckRow {
            check: "material_errors".to_owned(),
            result: passed,
            actual: if passed { 0.0 } else { 1.0 },
            target: "0".to_owned(),
        }]
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn fill(store: &mut dyn ResultStore) {
        let image = RgbImage::from_pixel(40, 20, image::Rgb([90, 120, 200]));
        assert_eq!(store.insert(at(100), true, &rows(true), &image).unwrap(), 1);
        assert_eq!(store.insert(at(200), false, &rows(false), &image).unwrap(), 2);
        assert_eq!(store.insert(at(300), true, &rows(true), &image).unwrap(), 3);
    }

    fn check_queries(store: &dyn ResultStore) {
        let ids: Vec<u64> = store.query(at(150), at(300)).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, [2, 3]);

        let last: Vec<u64> = store.last(2).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(last, [3, 2]);

        let second = &store.query(at(200), at(200)).unwrap()[0];
        assert!(!second.result);
        assert_eq!(second.rows, rows(false));

        assert_eq!(store.fetch_image(1).unwrap().dimensions(), (10, 5));
        assert!(matches!(store.fetch_image(9), Err(StoreError::NotFound(9))));
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::new();
        fill(&mut store);
        check_queries(&store);
    }

    #[test]
    fn jsonl_store_persists_across_reopen() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path();

        let mut store = JsonlStore::open(dir).unwrap();
        fill(&mut store);
        check_queries(&store);

        let mut reopened = JsonlStore::open(dir).unwrap();
        let image = RgbImage::new(8, 8);
        assert_eq!(reopened.insert(at(400), true, &rows(true), &image).unwrap(), 4);
        assert_eq!(reopened.last(10).unwrap().len(), 4);
    }

    #[test]
    fn failed_append_leaves_no_image_behind() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path();
        let mut store = JsonlStore::open(dir).unwrap();
        // A directory where the records file belongs makes every append fail.
        std::fs::create_dir(dir.join("records.jsonl")).unwrap();

        let image = RgbImage::from_pixel(40, 20, image::Rgb([90, 120, 200]));
        assert!(store.insert(at(100), true, &rows(true), &image).is_err());
        assert!(!dir.join("images").join("1.jpg").exists());
        assert!(matches!(store.fetch_image(1), Err(StoreError::NotFound(1))));
    }
}
