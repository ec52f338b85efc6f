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
//! In-memory view of a tablet header.
use std::collections::BTreeMap;
use std::path::Path;

use roaring::RoaringBitmap;

use crate::common::ids::{
    PartitionId, ReplicaId, SchemaHash, TableId, TabletId, UniqueId, Version,
};
use crate::common::status::{Result, StorageError};
use crate::storage::metadata::{
    DeleteBitmapPb, RowsetBinlogMetaPb, RowsetMetaPb, TabletMetaPb, TabletStatePb, UniqueIdPb,
    read_message, write_message,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabletState {
    Running,
    NotReady,
}

/// Key of one delete-bitmap entry: segment of a rowset at a version.
pub type DeleteBitmapKey = (i64, u32, i64);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteBitmap {
    bitmaps: BTreeMap<DeleteBitmapKey, RoaringBitmap>,
}

impl DeleteBitmap {
    pub fn is_empty(&self) -> bool {
        self.bitmaps.is_empty()
    }

    pub fn get(&self, key: &DeleteBitmapKey) -> Option<&RoaringBitmap> {
        self.bitmaps.get(key)
    }

    pub fn keys(&self) -> Vec<DeleteBitmapKey> {
        self.bitmaps.keys().copied().collect()
    }

    pub fn insert(&mut self, key: DeleteBitmapKey, bitmap: RoaringBitmap) {
        self.bitmaps.insert(key, bitmap);
    }

    /// Unions `other` into `self`, key by key.
    pub fn merge(&mut self, other: &DeleteBitmap) {
        for (key, bitmap) in &other.bitmaps {
            match self.bitmaps.get_mut(key) {
                Some(existing) => *existing |= bitmap,
                None => {
                    self.bitmaps.insert(*key, bitmap.clone());
                }
            }
        }
    }

    pub fn to_pb(&self) -> Result<DeleteBitmapPb> {
        let mut pb = DeleteBitmapPb::default();
        for ((rowset_id, segment_id, version), bitmap) in &self.bitmaps {
            let mut bytes = Vec::with_capacity(bitmap.serialized_size());
            bitmap
                .serialize_into(&mut bytes)
                .map_err(|e| StorageError::internal(format!("serialize delete bitmap: {}", e)))?;
            pb.rowset_ids.push(*rowset_id);
            pb.segment_ids.push(*segment_id);
            pb.versions.push(*version);
            pb.segment_delete_bitmaps.push(bytes);
        }
        Ok(pb)
    }

    pub fn from_pb(pb: &DeleteBitmapPb) -> Result<Self> {
        let n = pb.rowset_ids.len();
        if pb.segment_ids.len() != n
            || pb.versions.len() != n
            || pb.segment_delete_bitmaps.len() != n
        {
            return Err(StorageError::internal(
                "delete bitmap arrays have mismatched lengths",
            ));
        }
        let mut out = DeleteBitmap::default();
        for i in 0..n {
            let bitmap = RoaringBitmap::deserialize_from(pb.segment_delete_bitmaps[i].as_slice())
                .map_err(|e| {
                    StorageError::internal(format!("deserialize delete bitmap: {}", e))
                })?;
            out.bitmaps
                .insert((pb.rowset_ids[i], pb.segment_ids[i], pb.versions[i]), bitmap);
        }
        Ok(out)
    }
}

#[derive(Clone, Debug)]
pub struct TabletMeta {
    pub table_id: TableId,
    pub partition_id: PartitionId,
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub replica_id: ReplicaId,
    pub shard_id: i64,
    pub creation_time: i64,
    pub state: TabletState,
    rs_metas: BTreeMap<Version, RowsetMetaPb>,
    pub cooldown_meta_id: Option<UniqueId>,
    pub enable_unique_key_merge_on_write: bool,
    pub delete_bitmap: DeleteBitmap,
    pub rowset_binlog_metas: Vec<RowsetBinlogMetaPb>,
}

impl TabletMeta {
    pub fn from_pb(pb: &TabletMetaPb) -> Result<Self> {
        let state = match TabletStatePb::try_from(pb.tablet_state) {
            Ok(TabletStatePb::Running) => TabletState::Running,
            Ok(TabletStatePb::NotReady) => TabletState::NotReady,
            Err(_) => {
                return Err(StorageError::internal(format!(
                    "unknown tablet state {} for tablet_id={}",
                    pb.tablet_state, pb.tablet_id
                )));
            }
        };
        let mut rs_metas = BTreeMap::new();
        for rs in &pb.rs_metas {
            let version = Version::new(rs.start_version, rs.end_version);
            if rs_metas.insert(version, rs.clone()).is_some() {
                return Err(StorageError::internal(format!(
                    "duplicate rowset version {} in tablet meta, tablet_id={}",
                    version, pb.tablet_id
                )));
            }
        }
        let delete_bitmap = match &pb.delete_bitmap {
            Some(bitmap_pb) => DeleteBitmap::from_pb(bitmap_pb)?,
            None => DeleteBitmap::default(),
        };
        Ok(Self {
            table_id: pb.table_id,
            partition_id: pb.partition_id,
            tablet_id: pb.tablet_id,
            schema_hash: pb.schema_hash,
            replica_id: pb.replica_id,
            shard_id: pb.shard_id,
            creation_time: pb.creation_time,
            state,
            rs_metas,
            cooldown_meta_id: pb
                .cooldown_meta_id
                .as_ref()
                .map(|id| UniqueId { hi: id.hi, lo: id.lo }),
            enable_unique_key_merge_on_write: pb.enable_unique_key_merge_on_write,
            delete_bitmap,
            rowset_binlog_metas: pb.rowset_binlog_metas.clone(),
        })
    }

    pub fn to_pb(&self) -> Result<TabletMetaPb> {
        let state = match self.state {
            TabletState::Running => TabletStatePb::Running,
            TabletState::NotReady => TabletStatePb::NotReady,
        };
        let delete_bitmap = if self.delete_bitmap.is_empty() {
            None
        } else {
            Some(self.delete_bitmap.to_pb()?)
        };
        Ok(TabletMetaPb {
            table_id: self.table_id,
            partition_id: self.partition_id,
            tablet_id: self.tablet_id,
            schema_hash: self.schema_hash,
            replica_id: self.replica_id,
            shard_id: self.shard_id,
            creation_time: self.creation_time,
            tablet_state: state as i32,
            rs_metas: self.rs_metas.values().cloned().collect(),
            cooldown_meta_id: self
                .cooldown_meta_id
                .map(|id| UniqueIdPb { hi: id.hi, lo: id.lo }),
            enable_unique_key_merge_on_write: self.enable_unique_key_merge_on_write,
            delete_bitmap,
            rowset_binlog_metas: self.rowset_binlog_metas.clone(),
        })
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let pb: TabletMetaPb = read_message(path)?;
        Self::from_pb(&pb)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        write_message(path, &self.to_pb()?)
    }

    pub fn all_rs_metas(&self) -> impl Iterator<Item = &RowsetMetaPb> {
        self.rs_metas.values()
    }

    pub fn rowset_versions(&self) -> Vec<Version> {
        self.rs_metas.keys().copied().collect()
    }

    pub fn rowset_count(&self) -> usize {
        self.rs_metas.len()
    }

    pub fn acquire_rs_meta_by_version(&self, version: Version) -> Option<&RowsetMetaPb> {
        self.rs_metas.get(&version)
    }

    pub fn add_rs_meta(&mut self, rs_meta: RowsetMetaPb) {
        let version = Version::new(rs_meta.start_version, rs_meta.end_version);
        self.rs_metas.insert(version, rs_meta);
    }

    pub fn delete_rs_meta(&mut self, version: &Version) -> Option<RowsetMetaPb> {
        self.rs_metas.remove(version)
    }

    pub fn max_version(&self) -> Option<Version> {
        self.rs_metas.keys().max_by_key(|v| v.end).copied()
    }

    /// End of the gap-free version chain starting at 0, or -1 for an empty
    /// tablet. This is the version a replica may report to the controller.
    pub fn max_continuous_version(&self) -> i64 {
        let mut continuous = -1i64;
        for version in self.rs_metas.keys() {
            if version.start <= continuous + 1 {
                continuous = continuous.max(version.end);
            } else {
                break;
            }
        }
        continuous
    }

    /// Versions in `[0, spec_version]` not covered by any local rowset,
    /// expanded into singleton deltas so a source can serve them one by one.
    pub fn calc_missed_versions(&self, spec_version: i64) -> Vec<Version> {
        let mut missed = Vec::new();
        let mut last_version = -1i64;
        for version in self.rs_metas.keys() {
            if version.start > last_version + 1 {
                let mut v = last_version + 1;
                while v < version.start && v <= spec_version {
                    missed.push(Version::singleton(v));
                    v += 1;
                }
            }
            last_version = last_version.max(version.end);
            if last_version >= spec_version {
                break;
            }
        }
        let mut v = last_version + 1;
        while v <= spec_version {
            missed.push(Version::singleton(v));
            v += 1;
        }
        missed
    }
}
