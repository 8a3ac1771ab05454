//! Release storage and transactions.
//!
//! [`ReleaseStore`] hands out short read snapshots and serialisable transactions. The
//! [`LocalStore`] implementation keeps release records in memory behind a single mutex and,
//! when configured with a data directory, persists each committed release as JSON:
//!
//! ```text
//! <release_data_dir>/
//! └── ab/            # first two hex chars of sha256(release key)
//!     └── cd/        # next two hex chars
//!         └── <release key>.json
//! ```
//!
//! A transaction holds the store lock from `begin` until it is committed or dropped, so
//! operations on the store are serialised. Work happens on a private copy of the release
//! table that replaces the shared one only on commit; dropping a transaction discards it.

use crate::catalogue::Catalogue;
use crate::constants::RELEASE_JSON_EXTENSION;
use crate::release::Release;
use crate::{CoreError, CoreResult};
use dsr_types::ReleaseKey;
use dsr_uuid::Sha256Hash;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Read access to the catalogue and release records.
pub trait StoreRead {
    fn catalogue(&self) -> &Catalogue;

    fn release(&self, key: &ReleaseKey) -> Option<&Release>;

    fn release_keys(&self) -> Vec<ReleaseKey>;
}

/// A unit of work over the store. Dropping without [`StoreTransaction::commit`] rolls back.
pub trait StoreTransaction: StoreRead {
    /// Insert or replace a release record.
    fn put_release(&mut self, release: Release);

    fn commit(self: Box<Self>) -> CoreResult<()>;
}

pub trait ReleaseStore: Send + Sync {
    fn snapshot(&self) -> CoreResult<Box<dyn StoreRead + '_>>;

    fn begin(&self) -> CoreResult<Box<dyn StoreTransaction + '_>>;
}

type ReleaseTable = BTreeMap<ReleaseKey, Release>;

#[derive(Debug)]
pub struct LocalStore {
    catalogue: Catalogue,
    releases: Mutex<ReleaseTable>,
    persist_dir: Option<PathBuf>,
}

impl LocalStore {
    /// A store that lives only as long as the process.
    pub fn in_memory(catalogue: Catalogue) -> Self {
        Self {
            catalogue,
            releases: Mutex::new(BTreeMap::new()),
            persist_dir: None,
        }
    }

    /// A store backed by `dir`, loading any releases already written there.
    ///
    /// Fails with [`CoreError::DanglingSelection`] if a stored release selects specimens that
    /// `catalogue` no longer holds within the release's datasets.
    pub fn open(catalogue: Catalogue, dir: &Path) -> CoreResult<Self> {
        fs::create_dir_all(dir).map_err(CoreError::ReleaseDirCreation)?;
        let releases = load_releases(dir)?;
        for release in releases.values() {
            check_selection(&catalogue, release)?;
        }
        tracing::info!(
            dir = %dir.display(),
            releases = releases.len(),
            "opened release store"
        );

        Ok(Self {
            catalogue,
            releases: Mutex::new(releases),
            persist_dir: Some(dir.to_path_buf()),
        })
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, ReleaseTable>> {
        self.releases
            .lock()
            .map_err(|_| CoreError::StoreUnavailable("release table lock poisoned".into()))
    }
}

impl ReleaseStore for LocalStore {
    fn snapshot(&self) -> CoreResult<Box<dyn StoreRead + '_>> {
        Ok(Box::new(LocalSnapshot {
            catalogue: &self.catalogue,
            releases: self.lock()?,
        }))
    }

    fn begin(&self) -> CoreResult<Box<dyn StoreTransaction + '_>> {
        let guard = self.lock()?;
        let working = guard.clone();
        Ok(Box::new(LocalTransaction {
            store: self,
            guard,
            working,
            dirty: BTreeSet::new(),
        }))
    }
}

struct LocalSnapshot<'a> {
    catalogue: &'a Catalogue,
    releases: MutexGuard<'a, ReleaseTable>,
}

impl StoreRead for LocalSnapshot<'_> {
    fn catalogue(&self) -> &Catalogue {
        self.catalogue
    }

    fn release(&self, key: &ReleaseKey) -> Option<&Release> {
        self.releases.get(key)
    }

    fn release_keys(&self) -> Vec<ReleaseKey> {
        self.releases.keys().cloned().collect()
    }
}

struct LocalTransaction<'a> {
    store: &'a LocalStore,
    guard: MutexGuard<'a, ReleaseTable>,
    working: ReleaseTable,
    dirty: BTreeSet<ReleaseKey>,
}

impl StoreRead for LocalTransaction<'_> {
    fn catalogue(&self) -> &Catalogue {
        &self.store.catalogue
    }

    fn release(&self, key: &ReleaseKey) -> Option<&Release> {
        self.working.get(key)
    }

    fn release_keys(&self) -> Vec<ReleaseKey> {
        self.working.keys().cloned().collect()
    }
}

impl StoreTransaction for LocalTransaction<'_> {
    fn put_release(&mut self, release: Release) {
        self.dirty.insert(release.key().clone());
        self.working.insert(release.key().clone(), release);
    }

    fn commit(self: Box<Self>) -> CoreResult<()> {
        let LocalTransaction {
            store,
            mut guard,
            working,
            dirty,
        } = *self;

        if let Some(dir) = store.persist_dir.as_deref() {
            let releases: Vec<&Release> = dirty.iter().filter_map(|k| working.get(k)).collect();
            let staged = stage_releases(dir, &releases)?;
            for (tmp, path) in &staged {
                fs::rename(tmp, path).map_err(CoreError::FileWrite)?;
            }
        }

        *guard = working;
        Ok(())
    }
}

/// Every selected specimen must still exist under one of the release's datasets.
fn check_selection(catalogue: &Catalogue, release: &Release) -> CoreResult<()> {
    let missing = release
        .selected()
        .iter()
        .filter(|id| {
            catalogue
                .lineage(id)
                .map_or(true, |l| !release.datasets().contains(&l.case.dataset))
        })
        .count();
    if missing > 0 {
        return Err(CoreError::DanglingSelection {
            release: release.key().clone(),
            missing,
        });
    }
    Ok(())
}

/// Directory holding the record for `key`.
fn release_dir(dir: &Path, key: &ReleaseKey) -> PathBuf {
    Sha256Hash::digest(key.as_str()).sharded_dir(dir)
}

/// Write every release to a temp file beside its record, returning `(tmp, final)` pairs.
///
/// Nothing is renamed here. If any write fails, the temp files already written are removed
/// and the records on disk are untouched.
fn stage_releases(dir: &Path, releases: &[&Release]) -> CoreResult<Vec<(PathBuf, PathBuf)>> {
    let mut staged = Vec::with_capacity(releases.len());
    for release in releases {
        match stage_release(dir, release) {
            Ok(pair) => staged.push(pair),
            Err(err) => {
                for (tmp, _) in &staged {
                    let _ = fs::remove_file(tmp);
                }
                return Err(err);
            }
        }
    }
    Ok(staged)
}

fn stage_release(dir: &Path, release: &Release) -> CoreResult<(PathBuf, PathBuf)> {
    let shard = release_dir(dir, release.key());
    fs::create_dir_all(&shard).map_err(CoreError::ReleaseDirCreation)?;

    let json = serde_json::to_string_pretty(release).map_err(CoreError::Serialization)?;
    let path = shard.join(format!("{}.{}", release.key(), RELEASE_JSON_EXTENSION));
    let tmp = shard.join(format!("{}.{}.tmp", release.key(), RELEASE_JSON_EXTENSION));

    fs::write(&tmp, json).map_err(CoreError::FileWrite)?;
    Ok((tmp, path))
}

fn load_releases(dir: &Path) -> CoreResult<ReleaseTable> {
    let mut releases = BTreeMap::new();

    for s1 in fs::read_dir(dir).map_err(CoreError::FileRead)?.flatten() {
        let s1_path = s1.path();
        if !s1_path.is_dir() {
            continue;
        }

        let s2_iter = match fs::read_dir(&s1_path) {
            Ok(it) => it,
            Err(_) => continue,
        };

        for s2 in s2_iter.flatten() {
            let s2_path = s2.path();
            if !s2_path.is_dir() {
                continue;
            }

            let file_iter = match fs::read_dir(&s2_path) {
                Ok(it) => it,
                Err(_) => continue,
            };

            for file in file_iter.flatten() {
                let path = file.path();
                let is_record = path
                    .extension()
                    .is_some_and(|ext| ext == RELEASE_JSON_EXTENSION);
                if !path.is_file() || !is_record {
                    continue;
                }

                let contents = fs::read_to_string(&path).map_err(CoreError::FileRead)?;
                let release: Release =
                    serde_json::from_str(&contents).map_err(CoreError::Deserialization)?;
                releases.insert(release.key().clone(), release);
            }
        }
    }

    Ok(releases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{NewRelease, ReleaseFlags};
    use chrono::Utc;
    use dsr_types::NonEmptyText;
    use tempfile::TempDir;

    fn release(key: &str) -> Release {
        Release::create(
            NewRelease {
                key: ReleaseKey::new(key).unwrap(),
                description: NonEmptyText::new("test").unwrap(),
                datasets: BTreeSet::new(),
                flags: ReleaseFlags::default(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = LocalStore::in_memory(Catalogue::new());
        {
            let mut tx = store.begin().unwrap();
            tx.put_release(release("R1"));
            assert!(tx.release(&ReleaseKey::new("R1").unwrap()).is_some());
        }
        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.release_keys().is_empty());
    }

    #[test]
    fn committed_transaction_is_visible() {
        let store = LocalStore::in_memory(Catalogue::new());
        let mut tx = store.begin().unwrap();
        tx.put_release(release("R1"));
        tx.commit().expect("commit should succeed");

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.release_keys(), vec![ReleaseKey::new("R1").unwrap()]);
    }

    #[test]
    fn persistent_store_reloads_committed_releases() {
        let dir = TempDir::new().expect("failed to create temp dir");

        {
            let store = LocalStore::open(Catalogue::new(), dir.path()).unwrap();
            let mut tx = store.begin().unwrap();
            tx.put_release(release("R1"));
            tx.put_release(release("R2"));
            tx.commit().unwrap();
        }

        let key = ReleaseKey::new("R1").unwrap();
        let expected = release_dir(dir.path(), &key).join("R1.json");
        assert!(expected.is_file(), "release file should be sharded");

        let reopened = LocalStore::open(Catalogue::new(), dir.path()).unwrap();
        let snapshot = reopened.snapshot().unwrap();
        assert_eq!(snapshot.release_keys().len(), 2);
        assert!(snapshot.release(&key).is_some());
    }

    const CATALOGUE: &str = r#"
datasets:
  - uri: urn:dataset:a
    cases:
      - identifiers: [{ value: "CASE-1" }]
        patients:
          - identifiers: [{ value: "PAT-1" }]
            specimens:
              - identifiers: [{ value: "SPC-1" }]
"#;

    fn release_selecting_catalogue_specimen(catalogue: &Catalogue) -> Release {
        let datasets = BTreeSet::from(["urn:dataset:a".to_string()]);
        let specimens: BTreeSet<_> = catalogue
            .scope(&datasets)
            .lineages
            .iter()
            .map(|l| l.specimen.id)
            .collect();
        let mut release = Release::create(
            NewRelease {
                key: ReleaseKey::new("R1").unwrap(),
                description: NonEmptyText::new("test").unwrap(),
                datasets,
                flags: ReleaseFlags::default(),
            },
            Utc::now(),
        );
        assert_eq!(release.select(&specimens), 1);
        release
    }

    #[test]
    fn selection_survives_catalogue_reload() {
        let dir = TempDir::new().unwrap();
        {
            let catalogue = Catalogue::from_yaml(CATALOGUE).unwrap();
            let release = release_selecting_catalogue_specimen(&catalogue);
            let store = LocalStore::open(catalogue, dir.path()).unwrap();
            let mut tx = store.begin().unwrap();
            tx.put_release(release);
            tx.commit().unwrap();
        }

        let reloaded = Catalogue::from_yaml(CATALOGUE).unwrap();
        let store = LocalStore::open(reloaded, dir.path()).expect("selection should still resolve");
        let snapshot = store.snapshot().unwrap();
        let release = snapshot.release(&ReleaseKey::new("R1").unwrap()).unwrap();
        let id = *release.selected().iter().next().unwrap();
        assert!(snapshot.catalogue().lineage(&id).is_some());
    }

    #[test]
    fn open_rejects_selection_missing_from_catalogue() {
        let dir = TempDir::new().unwrap();
        {
            let catalogue = Catalogue::from_yaml(CATALOGUE).unwrap();
            let release = release_selecting_catalogue_specimen(&catalogue);
            let store = LocalStore::open(Catalogue::new(), dir.path()).unwrap();
            let mut tx = store.begin().unwrap();
            tx.put_release(release);
            tx.commit().unwrap();
        }

        let err = LocalStore::open(Catalogue::new(), dir.path())
            .expect_err("a selection pointing nowhere should be rejected");
        assert!(matches!(err, CoreError::DanglingSelection { missing: 1, .. }));
    }

    #[test]
    fn commit_leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(Catalogue::new(), dir.path()).unwrap();
        let mut tx = store.begin().unwrap();
        tx.put_release(release("R1"));
        tx.put_release(release("R2"));
        tx.commit().unwrap();

        for key in ["R1", "R2"] {
            let shard = release_dir(dir.path(), &ReleaseKey::new(key).unwrap());
            let names: Vec<String> = fs::read_dir(&shard)
                .unwrap()
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names, vec![format!("{}.json", key)]);
        }
    }

    #[test]
    fn failed_staging_keeps_existing_records() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(Catalogue::new(), dir.path()).unwrap();
        let mut tx = store.begin().unwrap();
        tx.put_release(release("R1"));
        tx.commit().unwrap();

        // A directory where R2's shard should go makes its staging fail.
        let blocked = release_dir(dir.path(), &ReleaseKey::new("R2").unwrap());
        fs::create_dir_all(blocked.parent().unwrap()).unwrap();
        fs::write(&blocked, b"not a directory").unwrap();

        let mut first = release("R1");
        first.apply_update(crate::release::ReleaseUpdate::AllowGs(true));
        let staged = stage_releases(dir.path(), &[&first, &release("R2")]);
        assert!(staged.is_err());

        let r1_shard = release_dir(dir.path(), &ReleaseKey::new("R1").unwrap());
        assert!(!r1_shard.join("R1.json.tmp").exists());
        let on_disk = fs::read_to_string(r1_shard.join("R1.json")).unwrap();
        let stored: Release = serde_json::from_str(&on_disk).unwrap();
        assert!(!stored.flags().allow_gs);
    }

    #[test]
    fn uncommitted_releases_are_not_written() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(Catalogue::new(), dir.path()).unwrap();
        {
            let mut tx = store.begin().unwrap();
            tx.put_release(release("R1"));
        }
        let key = ReleaseKey::new("R1").unwrap();
        assert!(!release_dir(dir.path(), &key).exists());
    }
}
