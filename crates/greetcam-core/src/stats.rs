//! Daily greeting statistics, persisted as one JSON record per calendar day.
//!
//! Records live at `<dir>/<YYYY-MM-DD>.json`. Every write replaces the whole
//! record through a temp file, fsync and rename, so a crash mid-write leaves
//! the previous record intact.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const RECORD_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("stats I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed stats record {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("stats record {path} is for {found}, expected {expected}")]
    DateMismatch {
        path: PathBuf,
        expected: NaiveDate,
        found: NaiveDate,
    },
    #[error("serialize stats: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Greeting counts for one calendar day.
///
/// `total_greetings` always equals the sum of `per_face_counts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_greetings: u64,
    pub per_face_counts: BTreeMap<u64, u64>,
}

impl DailyStats {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_greetings: 0,
            per_face_counts: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, face_id: u64) {
        *self.per_face_counts.entry(face_id).or_insert(0) += 1;
        self.total_greetings += 1;
    }

    pub fn count_for(&self, face_id: u64) -> u64 {
        self.per_face_counts.get(&face_id).copied().unwrap_or(0)
    }

    pub fn is_consistent(&self) -> bool {
        self.total_greetings == self.per_face_counts.values().sum::<u64>()
    }

    pub fn max_face_id(&self) -> Option<u64> {
        self.per_face_counts.keys().next_back().copied()
    }
}

/// Path of the record for `date` inside `dir`.
pub fn record_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.{RECORD_EXTENSION}", date.format("%Y-%m-%d")))
}

/// Read the record for `date`. `Ok(None)` when no record exists.
pub fn read_day(dir: &Path, date: NaiveDate) -> Result<Option<DailyStats>, StatsError> {
    let path = record_path(dir, date);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StatsError::Io { path, source }),
    };
    let mut stats: DailyStats =
        serde_json::from_str(&raw).map_err(|source| StatsError::Malformed {
            path: path.clone(),
            source,
        })?;
    if stats.date != date {
        return Err(StatsError::DateMismatch {
            path,
            expected: date,
            found: stats.date,
        });
    }
    if !stats.is_consistent() {
        let sum = stats.per_face_counts.values().sum();
        tracing::warn!(
            path = %path.display(),
            recorded = stats.total_greetings,
            sum,
            "stats total disagrees with per-face counts; using the per-face sum"
        );
        stats.total_greetings = sum;
    }
    Ok(Some(stats))
}

/// Dates with a record in `dir`, oldest first. A missing directory has none.
pub fn list_days(dir: &Path) -> Result<Vec<NaiveDate>, StatsError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StatsError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut days = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StatsError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
            days.push(date);
        }
    }
    days.sort();
    Ok(days)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StatsError> {
    let io_err = |source| StatsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let tmp = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)
}

/// Single-writer store holding the current day's record in memory.
///
/// In-memory counts are authoritative for the running process. A failed write
/// leaves the store dirty and the next `record_greeting` or `flush` rewrites the
/// full record. Records of earlier days that could not be saved before a
/// rollover stay pending and are retried the same way.
pub struct StatsStore {
    dir: PathBuf,
    current: DailyStats,
    dirty: bool,
    pending: Vec<DailyStats>,
}

impl StatsStore {
    /// Open the store in `dir`, loading `today`'s record if one exists.
    pub fn open(dir: impl Into<PathBuf>, today: NaiveDate) -> Result<Self, StatsError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StatsError::Io {
            path: dir.clone(),
            source,
        })?;
        let current = load_or_empty(&dir, today);
        tracing::info!(
            dir = %dir.display(),
            date = %today,
            total = current.total_greetings,
            "stats store opened"
        );
        Ok(Self {
            dir,
            current,
            dirty: false,
            pending: Vec::new(),
        })
    }

    /// The in-memory record for the current day.
    pub fn current(&self) -> &DailyStats {
        &self.current
    }

    /// Whether any in-memory counts, for today or an earlier day, are unsaved.
    pub fn is_dirty(&self) -> bool {
        self.dirty || !self.pending.is_empty()
    }

    /// Stats for `date`. Missing or malformed records read as zero counts.
    pub fn load(&self, date: NaiveDate) -> DailyStats {
        if date == self.current.date {
            return self.current.clone();
        }
        if let Some(record) = self.pending.iter().find(|r| r.date == date) {
            return record.clone();
        }
        load_or_empty(&self.dir, date)
    }

    /// Count one greet decision for `face_id` on `date` and persist it.
    ///
    /// A date different from the current record's starts that date's record
    /// first. On write failure the count is kept in memory and the error is
    /// returned for the caller to log.
    pub fn record_greeting(&mut self, face_id: u64, date: NaiveDate) -> Result<(), StatsError> {
        if date != self.current.date {
            self.rollover(self.current.date, date);
        }
        self.current.record(face_id);
        self.dirty = true;
        let earlier = self.retry_pending();
        self.persist()?;
        earlier
    }

    /// Switch from `old_date`'s record to `new_date`'s.
    ///
    /// Unsaved counts for the old day get one more write attempt. If that fails
    /// the old record is kept pending and retried on every later write. The old
    /// record is never merged into the new one.
    pub fn rollover(&mut self, old_date: NaiveDate, new_date: NaiveDate) {
        if old_date != self.current.date {
            tracing::warn!(
                old_date = %old_date,
                current = %self.current.date,
                "rollover from a date that is not the current record"
            );
        }
        let unsaved = if self.dirty { self.persist().err() } else { None };

        let next = match self.pending.iter().position(|r| r.date == new_date) {
            Some(idx) => {
                self.dirty = true;
                self.pending.remove(idx)
            }
            None => {
                self.dirty = false;
                load_or_empty(&self.dir, new_date)
            }
        };
        let previous = std::mem::replace(&mut self.current, next);
        if let Some(e) = unsaved {
            tracing::warn!(
                error = %e,
                date = %previous.date,
                total = previous.total_greetings,
                "could not save stats before rollover; keeping the record pending"
            );
            self.pending.push(previous);
        }
        tracing::info!(
            from = %old_date,
            to = %new_date,
            total = self.current.total_greetings,
            "stats day rollover"
        );
    }

    /// Write every record that has unsaved counts.
    pub fn flush(&mut self) -> Result<(), StatsError> {
        let earlier = self.retry_pending();
        if self.dirty {
            self.persist()?;
        }
        earlier
    }

    /// Lowest face id that cannot collide with an id already in today's record.
    pub fn next_face_id(&self) -> u64 {
        self.current.max_face_id().map_or(1, |id| id + 1)
    }

    pub fn recorded_dates(&self) -> Result<Vec<NaiveDate>, StatsError> {
        list_days(&self.dir)
    }

    fn persist(&mut self) -> Result<(), StatsError> {
        write_record(&self.dir, &self.current)?;
        self.dirty = false;
        Ok(())
    }

    /// Write pending records of earlier days; the first failure is returned
    /// and every record that failed stays pending.
    fn retry_pending(&mut self) -> Result<(), StatsError> {
        let mut first_err = None;
        for record in std::mem::take(&mut self.pending) {
            match write_record(&self.dir, &record) {
                Ok(()) => tracing::info!(date = %record.date, "saved pending stats record"),
                Err(e) => {
                    first_err.get_or_insert(e);
                    self.pending.push(record);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn write_record(dir: &Path, record: &DailyStats) -> Result<(), StatsError> {
    let path = record_path(dir, record.date);
    let json = serde_json::to_vec_pretty(record)?;
    write_atomic(&path, &json)?;
    tracing::debug!(
        path = %path.display(),
        total = record.total_greetings,
        "stats saved"
    );
    Ok(())
}

fn load_or_empty(dir: &Path, date: NaiveDate) -> DailyStats {
    match read_day(dir, date) {
        Ok(Some(stats)) => stats,
        Ok(None) => DailyStats::empty(date),
        Err(e) => {
            tracing::warn!(error = %e, date = %date, "ignoring unreadable stats record");
            DailyStats::empty(date)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StatsStore::open(dir.path(), day(18)).unwrap();
        store.record_greeting(1, day(18)).unwrap();
        store.record_greeting(1, day(18)).unwrap();
        store.record_greeting(2, day(18)).unwrap();

        let expected: BTreeMap<u64, u64> = [(1, 2), (2, 1)].into_iter().collect();
        assert_eq!(store.current().total_greetings, 3);
        assert_eq!(store.current().per_face_counts, expected);

        let reopened = StatsStore::open(dir.path(), day(18)).unwrap();
        assert_eq!(reopened.current(), store.current());
        assert!(!reopened.is_dirty());
    }

    #[test]
    fn test_resave_without_greetings_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StatsStore::open(dir.path(), day(18)).unwrap();
        store.record_greeting(7, day(18)).unwrap();
        let path = record_path(dir.path(), day(18));
        let before = fs::read_to_string(&path).unwrap();

        let mut reopened = StatsStore::open(dir.path(), day(18)).unwrap();
        reopened.dirty = true;
        reopened.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_day_rollover_leaves_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StatsStore::open(dir.path(), day(18)).unwrap();
        store.record_greeting(1, day(18)).unwrap();
        store.record_greeting(2, day(18)).unwrap();
        let previous = read_day(dir.path(), day(18)).unwrap().unwrap();

        store.record_greeting(2, day(19)).unwrap();
        assert_eq!(store.current().date, day(19));
        assert_eq!(store.current().total_greetings, 1);
        assert_eq!(store.current().count_for(2), 1);
        assert_eq!(read_day(dir.path(), day(18)).unwrap().unwrap(), previous);
        assert_eq!(store.recorded_dates().unwrap(), vec![day(18), day(19)]);
    }

    #[test]
    fn test_missing_record_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::open(dir.path().join("nested"), day(18)).unwrap();
        assert_eq!(store.current(), &DailyStats::empty(day(18)));
        assert_eq!(store.load(day(1)), DailyStats::empty(day(1)));
    }

    #[test]
    fn test_malformed_record_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(record_path(dir.path(), day(18)), "{ not json").unwrap();
        let mut store = StatsStore::open(dir.path(), day(18)).unwrap();
        assert_eq!(store.current().total_greetings, 0);

        store.record_greeting(3, day(18)).unwrap();
        let saved = read_day(dir.path(), day(18)).unwrap().unwrap();
        assert_eq!(saved.total_greetings, 1);
    }

    #[test]
    fn test_wrong_date_inside_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let other = serde_json::to_string(&DailyStats::empty(day(1))).unwrap();
        fs::write(record_path(dir.path(), day(18)), other).unwrap();
        assert!(matches!(
            read_day(dir.path(), day(18)),
            Err(StatsError::DateMismatch { .. })
        ));
    }

    #[test]
    fn test_inconsistent_total_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            record_path(dir.path(), day(18)),
            r#"{"date":"2026-10-18","total_greetings":10,"per_face_counts":{"1":2,"4":1}}"#,
        )
        .unwrap();
        let stats = read_day(dir.path(), day(18)).unwrap().unwrap();
        assert_eq!(stats.total_greetings, 3);
        assert!(stats.is_consistent());
        assert_eq!(stats.max_face_id(), Some(4));
    }

    #[test]
    fn test_write_failure_keeps_counts_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let stats_dir = dir.path().join("stats");
        let mut store = StatsStore::open(&stats_dir, day(18)).unwrap();
        fs::remove_dir_all(&stats_dir).unwrap();

        assert!(store.record_greeting(1, day(18)).is_err());
        assert!(store.is_dirty());
        assert_eq!(store.current().total_greetings, 1);

        fs::create_dir_all(&stats_dir).unwrap();
        store.record_greeting(1, day(18)).unwrap();
        assert!(!store.is_dirty());
        let saved = read_day(&stats_dir, day(18)).unwrap().unwrap();
        assert_eq!(saved.count_for(1), 2);
        assert_eq!(saved.total_greetings, 2);
    }

    #[test]
    fn test_unsaved_day_survives_rollover() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StatsStore::open(dir.path(), day(18)).unwrap();
        store.record_greeting(1, day(18)).unwrap();

        // A directory at the record path makes every rename onto it fail.
        let blocked = record_path(dir.path(), day(18));
        fs::remove_file(&blocked).unwrap();
        fs::create_dir(&blocked).unwrap();
        assert!(store.record_greeting(1, day(18)).is_err());

        assert!(store.record_greeting(2, day(19)).is_err());
        assert_eq!(store.current().date, day(19));
        assert!(store.is_dirty());
        assert_eq!(store.load(day(18)).total_greetings, 2);

        fs::remove_dir(&blocked).unwrap();
        store.record_greeting(2, day(19)).unwrap();
        store.flush().unwrap();
        assert!(!store.is_dirty());

        let saved = read_day(dir.path(), day(18)).unwrap().unwrap();
        assert_eq!(saved.total_greetings, 2);
        assert_eq!(saved.count_for(1), 2);
        assert_eq!(read_day(dir.path(), day(19)).unwrap().unwrap().count_for(2), 2);
    }

    #[test]
    fn test_flush_saves_pending_day() {
        let dir = tempfile::tempdir().unwrap();
        let stats_dir = dir.path().join("stats");
        let mut store = StatsStore::open(&stats_dir, day(18)).unwrap();
        fs::remove_dir_all(&stats_dir).unwrap();
        assert!(store.record_greeting(4, day(18)).is_err());

        store.rollover(day(18), day(19));
        assert!(store.is_dirty());
        assert!(store.flush().is_err());

        fs::create_dir_all(&stats_dir).unwrap();
        store.flush().unwrap();
        assert!(!store.is_dirty());
        assert_eq!(read_day(&stats_dir, day(18)).unwrap().unwrap().count_for(4), 1);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StatsStore::open(dir.path(), day(18)).unwrap();
        store.record_greeting(1, day(18)).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["2026-10-18.json".to_string()]);
    }

    #[test]
    fn test_next_face_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StatsStore::open(dir.path(), day(18)).unwrap();
        assert_eq!(store.next_face_id(), 1);
        store.record_greeting(5, day(18)).unwrap();
        store.record_greeting(2, day(18)).unwrap();
        assert_eq!(store.next_face_id(), 6);
    }

    #[test]
    fn test_list_days_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("junk.json"), "{}").unwrap();
        fs::write(record_path(dir.path(), day(3)), "{}").unwrap();
        assert_eq!(list_days(dir.path()).unwrap(), vec![day(3)]);
        assert!(list_days(&dir.path().join("absent")).unwrap().is_empty());
    }
}
