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
//! Embedded tablet-header store.
//!
//! One encoded record per tablet id. Tablet directories never hold a header
//! at steady state; this store is the single durable home of tablet metadata.
use std::path::{Path, PathBuf};

use crate::common::ids::TabletId;
use crate::common::status::Result;
use crate::common::util::remove_file_if_exists;
use crate::storage::metadata::{TabletMetaPb, read_message, write_message};
use crate::storage::tablet_meta::TabletMeta;

pub struct MetaStore {
    root: PathBuf,
}

impl MetaStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn record_path(&self, tablet_id: TabletId) -> PathBuf {
        self.root.join(format!("{}.meta", tablet_id))
    }

    pub fn save_tablet_meta(&self, meta: &TabletMeta) -> Result<()> {
        write_message(&self.record_path(meta.tablet_id), &meta.to_pb()?)
    }

    pub fn load_tablet_meta(&self, tablet_id: TabletId) -> Result<Option<TabletMeta>> {
        let path = self.record_path(tablet_id);
        if !path.exists() {
            return Ok(None);
        }
        let pb: TabletMetaPb = read_message(&path)?;
        Ok(Some(TabletMeta::from_pb(&pb)?))
    }

    pub fn remove_tablet_meta(&self, tablet_id: TabletId) -> Result<()> {
        remove_file_if_exists(&self.record_path(tablet_id))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::MetaStore;
    use crate::storage::metadata::{RowsetMetaPb, TabletMetaPb};
    use crate::storage::tablet_meta::TabletMeta;

    #[test]
    fn save_load_remove_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = MetaStore::open(dir.path().join("meta")).expect("open");

        let meta = TabletMeta::from_pb(&TabletMetaPb {
            tablet_id: 10001,
            schema_hash: 12345,
            replica_id: 3,
            rs_metas: vec![RowsetMetaPb {
                rowset_id: 1,
                tablet_id: 10001,
                start_version: 0,
                end_version: 1,
                ..Default::default()
            }],
            ..Default::default()
        })
        .expect("from_pb");

        store.save_tablet_meta(&meta).expect("save");
        let loaded = store
            .load_tablet_meta(10001)
            .expect("load")
            .expect("present");
        assert_eq!(loaded.tablet_id, 10001);
        assert_eq!(loaded.rowset_count(), 1);

        store.remove_tablet_meta(10001).expect("remove");
        assert!(store.load_tablet_meta(10001).expect("load").is_none());
    }
}
