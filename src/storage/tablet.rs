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
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::common::ids::{ReplicaId, SchemaHash, TabletId, Version};
use crate::common::status::{Result, StorageError};
use crate::silica_logging::warn;
use crate::storage::data_dir::DataDir;
use crate::storage::metadata::{RowsetBinlogMetasPb, RowsetMetaPb};
use crate::storage::rowset::Rowset;
use crate::storage::tablet_meta::{TabletMeta, TabletState};

/// Sentinel meaning "cumulative compaction restarts from scratch".
pub const K_INVALID_CUMULATIVE_POINT: i64 = -1;

/// Holding the full lock set longer than this is logged.
pub const TRACE_TABLET_LOCK_THRESHOLD: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default)]
pub struct CooldownConf {
    pub cooldown_replica_id: ReplicaId,
    pub term: i64,
}

/// One tablet replica hosted by this node.
///
/// Maintenance operations (clone, compaction, ingestion, schema change) must
/// serialize through the tablet's lock set; metadata mutation additionally
/// requires the header write lock, which `MergeLocks` holds last.
pub struct Tablet {
    tablet_id: TabletId,
    schema_hash: SchemaHash,
    tablet_path: PathBuf,
    data_dir: Arc<DataDir>,
    meta: RwLock<TabletMeta>,
    migration_lock: RwLock<()>,
    base_compaction_lock: Mutex<()>,
    cumulative_compaction_lock: Mutex<()>,
    cold_compaction_lock: Mutex<()>,
    build_inverted_index_lock: Mutex<()>,
    push_lock: Mutex<()>,
    rowset_update_lock: Mutex<()>,
    cooldown_conf: RwLock<CooldownConf>,
    cumulative_layer_point: AtomicI64,
}

/// The full mutation lock set, acquired in the one fixed order:
/// base compaction, cumulative compaction, cold compaction,
/// build-inverted-index, push, rowset update, header write.
/// Never acquire any subset in a different order.
pub struct MergeLocks<'a> {
    _base_compaction: MutexGuard<'a, ()>,
    _cumulative_compaction: MutexGuard<'a, ()>,
    _cold_compaction: MutexGuard<'a, ()>,
    _build_inverted_index: MutexGuard<'a, ()>,
    _push: MutexGuard<'a, ()>,
    _rowset_update: MutexGuard<'a, ()>,
    pub meta: RwLockWriteGuard<'a, TabletMeta>,
}

impl Tablet {
    pub fn new(meta: TabletMeta, data_dir: Arc<DataDir>, tablet_path: PathBuf) -> Arc<Self> {
        let tablet_id = meta.tablet_id;
        let schema_hash = meta.schema_hash;
        Arc::new(Self {
            tablet_id,
            schema_hash,
            tablet_path,
            data_dir,
            meta: RwLock::new(meta),
            migration_lock: RwLock::new(()),
            base_compaction_lock: Mutex::new(()),
            cumulative_compaction_lock: Mutex::new(()),
            cold_compaction_lock: Mutex::new(()),
            build_inverted_index_lock: Mutex::new(()),
            push_lock: Mutex::new(()),
            rowset_update_lock: Mutex::new(()),
            cooldown_conf: RwLock::new(CooldownConf::default()),
            cumulative_layer_point: AtomicI64::new(K_INVALID_CUMULATIVE_POINT),
        })
    }

    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    pub fn schema_hash(&self) -> SchemaHash {
        self.schema_hash
    }

    pub fn tablet_path(&self) -> &Path {
        &self.tablet_path
    }

    pub fn data_dir(&self) -> &Arc<DataDir> {
        &self.data_dir
    }

    fn meta_read(&self) -> RwLockReadGuard<'_, TabletMeta> {
        self.meta.read().expect("tablet meta lock")
    }

    pub fn tablet_state(&self) -> TabletState {
        self.meta_read().state
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.meta_read().replica_id
    }

    pub fn set_replica_id(&self, replica_id: ReplicaId) -> Result<()> {
        let mut meta = self.meta.write().expect("tablet meta lock");
        meta.replica_id = replica_id;
        self.save_meta(&meta)
    }

    pub fn enable_unique_key_merge_on_write(&self) -> bool {
        self.meta_read().enable_unique_key_merge_on_write
    }

    pub fn calc_missed_versions(&self, spec_version: i64) -> Vec<Version> {
        self.meta_read().calc_missed_versions(spec_version)
    }

    pub fn max_continuous_version(&self) -> i64 {
        self.meta_read().max_continuous_version()
    }

    pub fn rowset_versions(&self) -> Vec<Version> {
        self.meta_read().rowset_versions()
    }

    pub fn visible_meta(&self) -> TabletMeta {
        self.meta_read().clone()
    }

    /// Exclusive hold taken by a migration while it moves the tablet between
    /// disks.
    pub fn migration_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.migration_lock.write().expect("migration lock")
    }

    /// Fail-fast shared hold on the migration lock; a migrating tablet makes
    /// the caller back off instead of queueing behind the move.
    pub fn try_migration_read(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.migration_lock.try_read().map_err(|_| {
            StorageError::TryLockFailed(format!(
                "tablet {} is migrating, try again later",
                self.tablet_id
            ))
        })
    }

    pub fn take_merge_locks(&self) -> MergeLocks<'_> {
        let started = Instant::now();
        let locks = MergeLocks {
            _base_compaction: self.base_compaction_lock.lock().expect("base compaction lock"),
            _cumulative_compaction: self
                .cumulative_compaction_lock
                .lock()
                .expect("cumulative compaction lock"),
            _cold_compaction: self.cold_compaction_lock.lock().expect("cold compaction lock"),
            _build_inverted_index: self
                .build_inverted_index_lock
                .lock()
                .expect("build inverted index lock"),
            _push: self.push_lock.lock().expect("push lock"),
            _rowset_update: self.rowset_update_lock.lock().expect("rowset update lock"),
            meta: self.meta.write().expect("tablet meta lock"),
        };
        let waited = started.elapsed();
        if waited > TRACE_TABLET_LOCK_THRESHOLD {
            warn!(
                "tablet lock set acquisition was slow: tablet_id={} waited_ms={}",
                self.tablet_id,
                waited.as_millis()
            );
        }
        locks
    }

    pub fn cooldown_conf(&self) -> CooldownConf {
        *self.cooldown_conf.read().expect("cooldown conf lock")
    }

    pub fn set_cooldown_conf(&self, conf: CooldownConf) {
        *self.cooldown_conf.write().expect("cooldown conf lock") = conf;
    }

    pub fn cumulative_layer_point(&self) -> i64 {
        self.cumulative_layer_point.load(Ordering::Acquire)
    }

    pub fn set_cumulative_layer_point(&self, point: i64) {
        self.cumulative_layer_point.store(point, Ordering::Release);
    }

    /// Builds a rowset handle from metadata and verifies its segment files
    /// are present in the tablet directory.
    pub fn create_rowset(&self, rs_meta: &RowsetMetaPb) -> Result<Rowset> {
        let rowset = Rowset::new(rs_meta.clone());
        rowset.check_segment_files(&self.tablet_path)?;
        Ok(rowset)
    }

    /// Applies a clone revision to the header. With `additive` set, only adds;
    /// otherwise removes `to_delete` first. The caller must hold `MergeLocks`
    /// and pass its meta guard in.
    pub fn revise_tablet_meta(
        &self,
        meta: &mut TabletMeta,
        to_add: Vec<Rowset>,
        to_delete: Vec<Rowset>,
        additive: bool,
    ) -> Result<()> {
        if additive && !to_delete.is_empty() {
            return Err(StorageError::internal(
                "additive revision must not delete rowsets",
            ));
        }
        for rowset in &to_delete {
            meta.delete_rs_meta(&rowset.version());
        }
        for rowset in to_add {
            meta.add_rs_meta(rowset.meta().clone());
        }
        self.save_meta(meta)
    }

    /// Merges shipped binlog manifests into the header.
    pub fn ingest_binlog_metas(&self, metas: &RowsetBinlogMetasPb) -> Result<()> {
        let mut meta = self.meta.write().expect("tablet meta lock");
        for incoming in &metas.rowset_binlog_metas {
            let known = meta
                .rowset_binlog_metas
                .iter()
                .any(|m| m.rowset_id == incoming.rowset_id && m.version == incoming.version);
            if !known {
                meta.rowset_binlog_metas.push(incoming.clone());
            }
        }
        self.save_meta(&meta)
    }

    pub fn save_meta(&self, meta: &TabletMeta) -> Result<()> {
        self.data_dir.meta_store().save_tablet_meta(meta)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{K_INVALID_CUMULATIVE_POINT, Tablet};
    use crate::storage::data_dir::DataDir;
    use crate::storage::metadata::{RowsetBinlogMetaPb, RowsetBinlogMetasPb, TabletMetaPb};
    use crate::storage::tablet_meta::TabletMeta;

    fn test_tablet() -> (tempfile::TempDir, std::sync::Arc<Tablet>) {
        let dir = tempdir().expect("tempdir");
        let data_dir = DataDir::open(dir.path().join("root")).expect("open");
        let meta = TabletMeta::from_pb(&TabletMetaPb {
            tablet_id: 10001,
            schema_hash: 12345,
            replica_id: 3,
            ..Default::default()
        })
        .expect("meta");
        let tablet_path = dir.path().join("root/data/0/10001/12345");
        std::fs::create_dir_all(&tablet_path).expect("mkdir");
        let tablet = Tablet::new(meta, data_dir, tablet_path);
        (dir, tablet)
    }

    #[test]
    fn migration_try_read_fails_while_written() {
        let (_dir, tablet) = test_tablet();
        {
            let _shared = tablet.try_migration_read().expect("shared");
            // A second shared hold is fine.
            let _again = tablet.try_migration_read().expect("shared again");
        }
        let writer = tablet.migration_lock.write().expect("write");
        assert!(tablet.try_migration_read().is_err());
        drop(writer);
        tablet.try_migration_read().expect("released");
    }

    #[test]
    fn cumulative_layer_point_defaults_to_invalid() {
        let (_dir, tablet) = test_tablet();
        assert_eq!(tablet.cumulative_layer_point(), K_INVALID_CUMULATIVE_POINT);
        tablet.set_cumulative_layer_point(7);
        assert_eq!(tablet.cumulative_layer_point(), 7);
    }

    #[test]
    fn ingest_binlog_metas_deduplicates() {
        let (_dir, tablet) = test_tablet();
        let metas = RowsetBinlogMetasPb {
            rowset_binlog_metas: vec![RowsetBinlogMetaPb {
                rowset_id: 9,
                version: 2,
                num_files: 2,
            }],
        };
        tablet.ingest_binlog_metas(&metas).expect("ingest");
        tablet.ingest_binlog_metas(&metas).expect("ingest again");
        assert_eq!(tablet.visible_meta().rowset_binlog_metas.len(), 1);
    }

    #[test]
    fn set_replica_id_persists() {
        let (_dir, tablet) = test_tablet();
        tablet.set_replica_id(42).expect("set");
        assert_eq!(tablet.replica_id(), 42);
        let stored = tablet
            .data_dir()
            .meta_store()
            .load_tablet_meta(10001)
            .expect("load")
            .expect("present");
        assert_eq!(stored.replica_id, 42);
    }
}
