// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::config;
use crate::common::status::Result;
use crate::silica_logging::info;
use crate::storage::meta_store::MetaStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMedium {
    Hdd,
    Ssd,
}

#[derive(Clone, Copy, Debug)]
pub struct DiskStats {
    pub capacity_bytes: u64,
    pub available_bytes: u64,
}

/// One root directory on one disk. Tablet data lives under `<root>/data/<shard>`,
/// tablet headers under `<root>/meta`.
pub struct DataDir {
    root: PathBuf,
    meta_store: Arc<MetaStore>,
    next_shard: AtomicI64,
    disk_stats: Mutex<DiskStats>,
}

impl DataDir {
    pub fn open(root: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let root = root.into();
        std::fs::create_dir_all(root.join("data"))?;
        let meta_store = Arc::new(MetaStore::open(root.join("meta"))?);
        let disk_stats = stat_disk(&root).unwrap_or(DiskStats {
            capacity_bytes: 1 << 40,
            available_bytes: 1 << 40,
        });
        Ok(Arc::new(Self {
            root,
            meta_store,
            next_shard: AtomicI64::new(0),
            disk_stats: Mutex::new(disk_stats),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn data_root(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn meta_store(&self) -> &Arc<MetaStore> {
        &self.meta_store
    }

    /// Allocates a shard directory for a new tablet and returns its path.
    pub fn allocate_shard(&self) -> Result<PathBuf> {
        let shard = self.next_shard.fetch_add(1, Ordering::AcqRel);
        let shard_path = self.data_root().join(shard.to_string());
        std::fs::create_dir_all(&shard_path)?;
        Ok(shard_path)
    }

    pub fn disk_stats(&self) -> DiskStats {
        *self.disk_stats.lock().expect("disk stats lock")
    }

    /// Refreshes the cached disk usage; called by the disk monitor thread.
    pub fn update_disk_stats(&self, stats: DiskStats) {
        *self.disk_stats.lock().expect("disk stats lock") = stats;
    }

    pub fn refresh_disk_stats(&self) {
        if let Some(stats) = stat_disk(&self.root) {
            self.update_disk_stats(stats);
        }
    }

    /// True when accepting `incoming_bytes` more would push the disk past the
    /// flood stage (usage percentage and remaining-bytes floor both crossed).
    pub fn reach_capacity_limit(&self, incoming_bytes: u64) -> bool {
        let stats = self.disk_stats();
        if stats.capacity_bytes == 0 {
            return true;
        }
        let used = stats.capacity_bytes.saturating_sub(stats.available_bytes);
        let used_after = used.saturating_add(incoming_bytes);
        let left_after = stats.available_bytes.saturating_sub(incoming_bytes);
        let flood_percent = config::flood_stage_usage_percent() as u64;
        let flood_left = config::flood_stage_left_capacity_bytes();
        if used_after * 100 >= stats.capacity_bytes * flood_percent && left_after <= flood_left {
            info!(
                "disk reaches flood stage: path={} capacity={} available={} incoming={}",
                self.root.display(),
                stats.capacity_bytes,
                stats.available_bytes,
                incoming_bytes
            );
            return true;
        }
        false
    }

    /// Removes `<shard>/<tablet_id>` once its last schema-hash child is gone.
    pub fn delete_tablet_parent_path_if_empty(tablet_dir: &Path) -> Result<()> {
        let Some(parent) = tablet_dir.parent() else {
            return Ok(());
        };
        if parent.is_dir() && parent.read_dir()?.next().is_none() {
            std::fs::remove_dir(parent)?;
        }
        Ok(())
    }
}

fn stat_disk(path: &Path) -> Option<DiskStats> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let block_size = stat.f_frsize as u64;
    Some(DiskStats {
        capacity_bytes: stat.f_blocks as u64 * block_size,
        available_bytes: stat.f_bavail as u64 * block_size,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{DataDir, DiskStats};

    #[test]
    fn allocate_shard_creates_numbered_dirs() {
        let dir = tempdir().expect("tempdir");
        let data_dir = DataDir::open(dir.path()).expect("open");
        let first = data_dir.allocate_shard().expect("shard");
        let second = data_dir.allocate_shard().expect("shard");
        assert!(first.ends_with("data/0"));
        assert!(second.ends_with("data/1"));
        assert!(first.is_dir());
    }

    #[test]
    fn capacity_limit_trips_on_flooded_disk() {
        let dir = tempdir().expect("tempdir");
        let data_dir = DataDir::open(dir.path()).expect("open");
        data_dir.update_disk_stats(DiskStats {
            capacity_bytes: 100,
            available_bytes: 100,
        });
        assert!(!data_dir.reach_capacity_limit(10));

        data_dir.update_disk_stats(DiskStats {
            capacity_bytes: 100,
            available_bytes: 4,
        });
        assert!(data_dir.reach_capacity_limit(10));
    }

    #[test]
    fn parent_removed_only_when_empty() {
        let dir = tempdir().expect("tempdir");
        let tablet_dir = dir.path().join("10001").join("12345");
        fs::create_dir_all(&tablet_dir).expect("mkdir");
        let sibling = dir.path().join("10001").join("54321");
        fs::create_dir_all(&sibling).expect("mkdir");

        fs::remove_dir(&tablet_dir).expect("rm");
        DataDir::delete_tablet_parent_path_if_empty(&tablet_dir).expect("keep");
        assert!(dir.path().join("10001").is_dir());

        fs::remove_dir(&sibling).expect("rm");
        DataDir::delete_tablet_parent_path_if_empty(&sibling).expect("drop");
        assert!(!dir.path().join("10001").exists());
    }
}
