// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable per-clinic snapshot cache. One JSON file per clinic; a missing
//! or unreadable file just means no cached snapshot.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::state::Snapshot;

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, clinic_id: &str) -> PathBuf {
        self.dir.join(format!("{clinic_id}.json"))
    }

    /// Last snapshot persisted for the clinic, if any survives on disk.
    pub fn load(&self, clinic_id: &str) -> Option<Snapshot> {
        let path = self.path_for(clinic_id);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable snapshot cache");
                None
            }
        }
    }

    /// Persist a snapshot; written via a temp file so a crash mid-write
    /// never leaves a truncated cache behind.
    pub fn store(&self, clinic_id: &str, snapshot: &Snapshot) {
        if let Err(e) = self.try_store(clinic_id, snapshot) {
            warn!(clinic_id, error = %e, "snapshot cache write failed");
        }
    }

    fn try_store(&self, clinic_id: &str, snapshot: &Snapshot) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let path = self.path_for(clinic_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "snapshot cached");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use waitline_core::types::now_iso;
    use waitline_core::{Session, SessionStatus};

    fn snapshot(now_serving: i64) -> Snapshot {
        Snapshot {
            session: Session {
                id: "s1".into(),
                clinic_id: "c1".into(),
                date: "2026-08-29".into(),
                status: SessionStatus::Open,
                last_normal_number: now_serving,
                last_priority_number: 0,
                now_serving_number: now_serving,
                created_at: now_iso(),
                closed_at: None,
            },
            tokens: Vec::new(),
            daily_limit: 50,
        }
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path());

        cache.store("c1", &snapshot(4));
        let loaded = cache.load("c1").unwrap();
        assert_eq!(loaded.session.now_serving_number, 4);

        // Clinics cache independently.
        assert!(cache.load("c2").is_none());
    }

    #[test]
    fn corrupt_cache_reads_as_absent() {
        let dir = tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path());
        std::fs::write(dir.path().join("c1.json"), b"not json").unwrap();
        assert!(cache.load("c1").is_none());
    }
}
