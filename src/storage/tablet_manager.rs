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
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::common::ids::{PartitionId, ReplicaId, SchemaHash, TabletId};
use crate::common::status::{Result, StorageError};
use crate::common::util::remove_dir_all_if_exists;
use crate::silica_logging::{info, warn};
use crate::storage::data_dir::DataDir;
use crate::storage::metadata::header_file_path;
use crate::storage::tablet::Tablet;
use crate::storage::tablet_meta::TabletMeta;

/// Replica summary reported back to the cluster controller.
#[derive(Clone, Debug, Default)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    pub replica_id: ReplicaId,
    pub schema_hash: SchemaHash,
    pub partition_id: PartitionId,
    pub version: i64,
    pub row_count: i64,
    pub data_size: i64,
}

pub struct TabletManager {
    tablets: Mutex<HashMap<TabletId, Arc<Tablet>>>,
    /// At most one maintenance job (clone, restore, ...) per tablet at a time.
    transitions: Mutex<HashMap<TabletId, String>>,
    partition_versions: Mutex<HashMap<PartitionId, i64>>,
}

impl TabletManager {
    pub fn new() -> Self {
        Self {
            tablets: Mutex::new(HashMap::new()),
            transitions: Mutex::new(HashMap::new()),
            partition_versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_tablet(&self, tablet_id: TabletId) -> Option<Arc<Tablet>> {
        self.tablets
            .lock()
            .expect("tablet registry lock")
            .get(&tablet_id)
            .cloned()
    }

    pub fn add_tablet(&self, tablet: Arc<Tablet>) -> Result<()> {
        let mut tablets = self.tablets.lock().expect("tablet registry lock");
        if tablets.contains_key(&tablet.tablet_id()) {
            return Err(StorageError::internal(format!(
                "tablet {} already registered",
                tablet.tablet_id()
            )));
        }
        tablets.insert(tablet.tablet_id(), tablet);
        Ok(())
    }

    pub fn register_transition_tablet(&self, tablet_id: TabletId, job: &str) -> Result<()> {
        let mut transitions = self.transitions.lock().expect("transition registry lock");
        if let Some(current) = transitions.get(&tablet_id) {
            return Err(StorageError::TransitionBusy {
                tablet_id,
                job: current.clone(),
            });
        }
        transitions.insert(tablet_id, job.to_string());
        Ok(())
    }

    pub fn unregister_transition_tablet(&self, tablet_id: TabletId, job: &str) {
        let mut transitions = self.transitions.lock().expect("transition registry lock");
        match transitions.get(&tablet_id) {
            Some(current) if current == job => {
                transitions.remove(&tablet_id);
            }
            Some(current) => warn!(
                "unregister transition job mismatch: tablet_id={} held_by={} asked={}",
                tablet_id, current, job
            ),
            None => {}
        }
    }

    /// Drops a tablet replica: registry entry, stored header, and (unless
    /// `keep_files`) its directory.
    pub fn drop_tablet(
        &self,
        tablet_id: TabletId,
        replica_id: ReplicaId,
        keep_files: bool,
    ) -> Result<()> {
        let tablet = {
            let mut tablets = self.tablets.lock().expect("tablet registry lock");
            tablets.remove(&tablet_id)
        };
        let Some(tablet) = tablet else {
            return Err(StorageError::NotFound(format!(
                "tablet not found, tablet_id={}",
                tablet_id
            )));
        };
        if tablet.replica_id() != replica_id {
            warn!(
                "dropping tablet with replica mismatch: tablet_id={} local_replica={} req_replica={}",
                tablet_id,
                tablet.replica_id(),
                replica_id
            );
        }
        tablet.data_dir().meta_store().remove_tablet_meta(tablet_id)?;
        if !keep_files {
            remove_dir_all_if_exists(tablet.tablet_path())?;
            DataDir::delete_tablet_parent_path_if_empty(tablet.tablet_path())?;
        }
        info!(
            "dropped tablet: tablet_id={} replica_id={} keep_files={}",
            tablet_id, replica_id, keep_files
        );
        Ok(())
    }

    /// Loads a tablet whose directory already holds a `<tablet_id>.hdr`, moves
    /// the header into the metadata store, and registers the tablet.
    pub fn load_tablet_from_dir(
        &self,
        data_dir: &Arc<DataDir>,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        tablet_dir: &Path,
    ) -> Result<Arc<Tablet>> {
        let header_path = header_file_path(tablet_dir, tablet_id);
        if !header_path.exists() {
            return Err(StorageError::InconsistentSnapshot(format!(
                "tablet header missing: {}",
                header_path.display()
            )));
        }
        let meta = TabletMeta::load_from_file(&header_path)?;
        if meta.tablet_id != tablet_id || meta.schema_hash != schema_hash {
            return Err(StorageError::internal(format!(
                "tablet header identity mismatch: dir expects {}/{}, header has {}/{}",
                tablet_id, schema_hash, meta.tablet_id, meta.schema_hash
            )));
        }
        data_dir.meta_store().save_tablet_meta(&meta)?;
        let tablet = Tablet::new(meta, Arc::clone(data_dir), tablet_dir.to_path_buf());
        self.add_tablet(Arc::clone(&tablet))?;
        Ok(tablet)
    }

    /// Fills the caller's report with this replica's current state.
    pub fn report_tablet_info(&self, tablet_info: &mut TabletInfo) -> Result<()> {
        let Some(tablet) = self.get_tablet(tablet_info.tablet_id) else {
            return Err(StorageError::NotFound(format!(
                "tablet not found, tablet_id={}",
                tablet_info.tablet_id
            )));
        };
        let meta = tablet.visible_meta();
        tablet_info.replica_id = meta.replica_id;
        tablet_info.schema_hash = meta.schema_hash;
        tablet_info.partition_id = meta.partition_id;
        tablet_info.version = meta.max_continuous_version();
        tablet_info.row_count = meta.all_rs_metas().map(|rs| rs.num_rows).sum();
        tablet_info.data_size = meta.all_rs_metas().map(|rs| rs.total_disk_size).sum();
        Ok(())
    }

    pub fn update_partitions_visible_version(&self, updates: &[(PartitionId, i64)]) {
        let mut versions = self.partition_versions.lock().expect("partition version lock");
        for (partition_id, version) in updates {
            let entry = versions.entry(*partition_id).or_insert(*version);
            *entry = (*entry).max(*version);
        }
    }

    pub fn partition_visible_version(&self, partition_id: PartitionId) -> Option<i64> {
        self.partition_versions
            .lock()
            .expect("partition version lock")
            .get(&partition_id)
            .copied()
    }
}

impl Default for TabletManager {
    fn default() -> Self {
        Self::new()
    }
}
