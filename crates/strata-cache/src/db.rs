use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::CacheError;
use crate::record::{ChecksumRecord, SettingsRow};
use crate::snapshot::SubchunkCache;

/// Persistence of settings rows and subchunk checksums.
pub trait ChecksumStore: Send {
    /// Snapshot of the stored checksums of one profile.
    fn snapshot(&self, profile: &str) -> SubchunkCache;

    /// Adds records without an id. A record whose (profile, key) already exists
    /// overwrites that row. Returns the number of rows written.
    fn insert_batch(&mut self, records: &[ChecksumRecord]) -> Result<usize, CacheError>;

    /// Rewrites the crc of records by id. The whole batch fails, unchanged,
    /// when any id is unknown.
    fn update_batch(&mut self, records: &[ChecksumRecord]) -> Result<usize, CacheError>;

    fn settings(&self, dimension: i32, profile: &str) -> Option<SettingsRow>;

    /// Any stored settings row, used to inherit chunks-per-dimension.
    fn any_settings(&self) -> Option<SettingsRow>;

    fn put_settings(&mut self, row: SettingsRow) -> Result<(), CacheError>;

    /// Makes all changes durable.
    fn flush(&mut self) -> Result<(), CacheError>;
}

const FORMAT_VERSION: u32 = 1;

#[derive(Default, Serialize, Deserialize)]
struct DbFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    settings: Vec<SettingsRow>,
    #[serde(default)]
    checksums: Vec<ChecksumRecord>,
}

/// Checksum database kept in memory and written as one JSON document.
pub struct JsonChecksumDb {
    path: PathBuf,
    settings: Vec<SettingsRow>,
    rows: Vec<ChecksumRecord>,
    by_id: HashMap<u64, usize>,
    by_key: HashMap<(String, Vec<u8>), usize>,
    next_id: u64,
    dirty: bool,
}

impl JsonChecksumDb {
    /// Opens `path`, or starts empty when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            let text = fs::read_to_string(&path)?;
            let file: DbFile = serde_json::from_str(&text)?;
            if file.version > FORMAT_VERSION {
                return Err(CacheError::UnsupportedVersion(file.version));
            }
            file
        } else {
            DbFile::default()
        };
        let mut db = Self {
            path,
            settings: file.settings,
            rows: Vec::with_capacity(file.checksums.len()),
            by_id: HashMap::new(),
            by_key: HashMap::new(),
            next_id: 1,
            dirty: false,
        };
        for rec in file.checksums {
            db.push_row(rec);
        }
        log::debug!(
            "opened checksum db {} ({} checksums, {} settings rows)",
            db.path.display(),
            db.rows.len(),
            db.settings.len()
        );
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(&self) -> &[ChecksumRecord] {
        &self.rows
    }

    fn push_row(&mut self, mut rec: ChecksumRecord) {
        let id = rec.id.unwrap_or(self.next_id);
        rec.id = Some(id);
        self.next_id = self.next_id.max(id + 1);
        let key = (rec.profile.clone(), rec.level_db_key.clone());
        if let Some(&i) = self.by_key.get(&key) {
            // keep the existing row id so foreign references stay valid
            self.rows[i].crc32 = rec.crc32;
            return;
        }
        let i = self.rows.len();
        self.by_id.insert(id, i);
        self.by_key.insert(key, i);
        self.rows.push(rec);
    }
}

impl ChecksumStore for JsonChecksumDb {
    fn snapshot(&self, profile: &str) -> SubchunkCache {
        SubchunkCache::from_records(self.rows.iter().filter(|r| r.profile == profile))
    }

    fn insert_batch(&mut self, records: &[ChecksumRecord]) -> Result<usize, CacheError> {
        for rec in records {
            let mut rec = rec.clone();
            rec.id = None;
            self.push_row(rec);
        }
        self.dirty |= !records.is_empty();
        Ok(records.len())
    }

    fn update_batch(&mut self, records: &[ChecksumRecord]) -> Result<usize, CacheError> {
        let mut targets = Vec::with_capacity(records.len());
        for rec in records {
            let id = rec.id.ok_or(CacheError::MissingId)?;
            let &i = self.by_id.get(&id).ok_or(CacheError::UnknownId(id))?;
            targets.push((i, rec.crc32));
        }
        for (i, crc) in targets {
            self.rows[i].crc32 = crc;
        }
        self.dirty |= !records.is_empty();
        Ok(records.len())
    }

    fn settings(&self, dimension: i32, profile: &str) -> Option<SettingsRow> {
        self.settings
            .iter()
            .find(|s| s.dimension == dimension && s.profile == profile)
            .cloned()
    }

    fn any_settings(&self) -> Option<SettingsRow> {
        self.settings.first().cloned()
    }

    fn put_settings(&mut self, row: SettingsRow) -> Result<(), CacheError> {
        match self
            .settings
            .iter_mut()
            .find(|s| s.dimension == row.dimension && s.profile == row.profile)
        {
            Some(existing) => *existing = row,
            None => self.settings.push(row),
        }
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty && self.path.exists() {
            return Ok(());
        }
        let file = DbFile {
            version: FORMAT_VERSION,
            settings: self.settings.clone(),
            checksums: self.rows.clone(),
        };
        let text = serde_json::to_string(&file)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // write beside the target, then rename over it
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        log::debug!("flushed {} checksums to {}", self.rows.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_row(profile: &str) -> SettingsRow {
        SettingsRow {
            dimension: 0,
            profile: profile.into(),
            format: "png".into(),
            quality: 95,
            chunks_per_dimension: 2,
            min_zoom: 18,
            max_zoom: 20,
        }
    }

    #[test]
    fn insert_update_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        let mut db = JsonChecksumDb::open(&path).unwrap();
        assert!(db.is_empty());
        db.insert_batch(&[
            ChecksumRecord::new(vec![1], 10, "default"),
            ChecksumRecord::new(vec![2], 20, "default"),
            ChecksumRecord::new(vec![1], 30, "ore"),
        ])
        .unwrap();
        db.put_settings(settings_row("default")).unwrap();
        db.flush().unwrap();

        let mut db = JsonChecksumDb::open(&path).unwrap();
        assert_eq!(db.len(), 3);
        let snap = db.snapshot("default");
        assert_eq!(snap.len(), 2);
        let stored = snap.get(&[2]).unwrap();
        assert_eq!(stored.crc32, 20);

        let mut changed = ChecksumRecord::new(vec![2], 21, "default");
        changed.id = Some(stored.id);
        db.update_batch(&[changed]).unwrap();
        db.flush().unwrap();

        let db = JsonChecksumDb::open(&path).unwrap();
        assert!(db.snapshot("default").is_unchanged(&[2], 21));
        assert!(db.snapshot("ore").is_unchanged(&[1], 30));
        assert_eq!(db.settings(0, "default"), Some(settings_row("default")));
        assert_eq!(db.settings(1, "default"), None);
    }

    #[test]
    fn update_with_unknown_id_fails_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JsonChecksumDb::open(dir.path().join("c.json")).unwrap();
        db.insert_batch(&[ChecksumRecord::new(vec![1], 1, "default")]).unwrap();
        let id = db.snapshot("default").get(&[1]).unwrap().id;

        let mut good = ChecksumRecord::new(vec![1], 2, "default");
        good.id = Some(id);
        let mut bad = ChecksumRecord::new(vec![9], 3, "default");
        bad.id = Some(999);
        assert!(matches!(
            db.update_batch(&[good, bad]),
            Err(CacheError::UnknownId(999))
        ));
        assert!(db.snapshot("default").is_unchanged(&[1], 1));
    }

    #[test]
    fn duplicate_insert_keeps_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JsonChecksumDb::open(dir.path().join("c.json")).unwrap();
        db.insert_batch(&[ChecksumRecord::new(vec![5], 1, "default")]).unwrap();
        db.insert_batch(&[ChecksumRecord::new(vec![5], 2, "default")]).unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.snapshot("default").is_unchanged(&[5], 2));
    }

    #[test]
    fn settings_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JsonChecksumDb::open(dir.path().join("c.json")).unwrap();
        assert!(db.any_settings().is_none());
        db.put_settings(settings_row("default")).unwrap();
        let mut row = settings_row("default");
        row.min_zoom = 15;
        db.put_settings(row.clone()).unwrap();
        assert_eq!(db.settings(0, "default"), Some(row));
        assert!(db.any_settings().is_some());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonChecksumDb::open(&path), Err(CacheError::Json(_))));
    }
}
