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
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use threadpool::ThreadPool;

use crate::common::config;
use crate::common::ids::{PartitionId, TabletId};
use crate::common::status::{Result, StorageError};
use crate::storage::data_dir::{DataDir, StorageMedium};
use crate::storage::rowset::RowsetIdGenerator;
use crate::storage::tablet_manager::TabletManager;

/// Node-wide storage engine: disks, tablet registry, id allocation, and the
/// worker pool running maintenance tasks.
pub struct StorageEngine {
    data_dirs: Vec<Arc<DataDir>>,
    tablet_manager: Arc<TabletManager>,
    rowset_id_generator: RowsetIdGenerator,
    /// Versions written but not yet published, per tablet. A merge-on-write
    /// clone must not advance past the smallest pending publish.
    pending_publish: Mutex<HashMap<TabletId, BTreeSet<i64>>>,
    task_pool: ThreadPool,
}

impl StorageEngine {
    pub fn open(data_dir_paths: &[impl AsRef<Path>]) -> Result<Arc<Self>> {
        if data_dir_paths.is_empty() {
            return Err(StorageError::internal("no data dirs configured"));
        }
        let mut data_dirs = Vec::with_capacity(data_dir_paths.len());
        for path in data_dir_paths {
            data_dirs.push(DataDir::open(path.as_ref())?);
        }
        Ok(Arc::new(Self {
            data_dirs,
            tablet_manager: Arc::new(TabletManager::new()),
            rowset_id_generator: RowsetIdGenerator::new(1),
            pending_publish: Mutex::new(HashMap::new()),
            task_pool: ThreadPool::with_name(
                "StorageEngine task".to_string(),
                config::clone_worker_count(),
            ),
        }))
    }

    pub fn tablet_manager(&self) -> &Arc<TabletManager> {
        &self.tablet_manager
    }

    pub fn data_dirs(&self) -> &[Arc<DataDir>] {
        &self.data_dirs
    }

    pub fn rowset_id_generator(&self) -> &RowsetIdGenerator {
        &self.rowset_id_generator
    }

    /// Picks a disk and allocates a shard directory for a new tablet.
    /// `dest_path_hash` pins the choice when the controller already decided
    /// a destination disk.
    pub fn obtain_shard_path(
        &self,
        _storage_medium: StorageMedium,
        dest_path_hash: i64,
        _partition_id: PartitionId,
    ) -> Result<(PathBuf, Arc<DataDir>)> {
        let index = if dest_path_hash != 0 {
            dest_path_hash.unsigned_abs() as usize % self.data_dirs.len()
        } else {
            0
        };
        let data_dir = Arc::clone(&self.data_dirs[index]);
        let shard_path = data_dir.allocate_shard()?;
        Ok((shard_path, data_dir))
    }

    pub fn register_pending_publish_version(&self, tablet_id: TabletId, version: i64) {
        self.pending_publish
            .lock()
            .expect("pending publish lock")
            .entry(tablet_id)
            .or_default()
            .insert(version);
    }

    pub fn remove_pending_publish_version(&self, tablet_id: TabletId, version: i64) {
        let mut pending = self.pending_publish.lock().expect("pending publish lock");
        if let Some(versions) = pending.get_mut(&tablet_id) {
            versions.remove(&version);
            if versions.is_empty() {
                pending.remove(&tablet_id);
            }
        }
    }

    /// Smallest pending publish version for the tablet, or `i64::MAX`.
    pub fn get_pending_publish_min_version(&self, tablet_id: TabletId) -> i64 {
        self.pending_publish
            .lock()
            .expect("pending publish lock")
            .get(&tablet_id)
            .and_then(|versions| versions.first().copied())
            .unwrap_or(i64::MAX)
    }

    /// Runs a maintenance job on the engine worker pool.
    pub fn submit_task(&self, job: impl FnOnce() + Send + 'static) {
        self.task_pool.execute(job);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::StorageEngine;
    use crate::storage::data_dir::StorageMedium;

    #[test]
    fn pending_publish_min_version_tracks_smallest() {
        let dir = tempdir().expect("tempdir");
        let engine = StorageEngine::open(&[dir.path()]).expect("open");
        assert_eq!(engine.get_pending_publish_min_version(10001), i64::MAX);

        engine.register_pending_publish_version(10001, 9);
        engine.register_pending_publish_version(10001, 7);
        assert_eq!(engine.get_pending_publish_min_version(10001), 7);

        engine.remove_pending_publish_version(10001, 7);
        assert_eq!(engine.get_pending_publish_min_version(10001), 9);
        engine.remove_pending_publish_version(10001, 9);
        assert_eq!(engine.get_pending_publish_min_version(10001), i64::MAX);
    }

    #[test]
    fn obtain_shard_path_spreads_by_hash() {
        let dir_a = tempdir().expect("tempdir");
        let dir_b = tempdir().expect("tempdir");
        let engine = StorageEngine::open(&[dir_a.path(), dir_b.path()]).expect("open");

        let (path, data_dir) = engine
            .obtain_shard_path(StorageMedium::Hdd, 1, 7)
            .expect("shard");
        assert!(path.starts_with(data_dir.path()));
        assert!(path.is_dir());
    }
}
