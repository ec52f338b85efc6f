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
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::ids::{RowsetId, Version};
use crate::common::status::{Result, StorageError};
use crate::storage::metadata::RowsetMetaPb;

pub fn segment_data_file_name(rowset_id: RowsetId, segment_ord: u32) -> String {
    format!("{}_{}.dat", rowset_id, segment_ord)
}

pub fn segment_index_file_name(rowset_id: RowsetId, segment_ord: u32) -> String {
    format!("{}_{}.idx", rowset_id, segment_ord)
}

/// Immutable rowset handle built from persisted metadata.
///
/// Segment contents are opaque to this subsystem; the handle only knows the
/// file layout and the version range it covers.
#[derive(Clone, Debug)]
pub struct Rowset {
    meta: RowsetMetaPb,
}

impl Rowset {
    pub fn new(meta: RowsetMetaPb) -> Self {
        Self { meta }
    }

    pub fn rowset_id(&self) -> RowsetId {
        RowsetId::new(self.meta.rowset_id)
    }

    pub fn version(&self) -> Version {
        Version::new(self.meta.start_version, self.meta.end_version)
    }

    pub fn is_local(&self) -> bool {
        self.meta.resource_id.is_none()
    }

    pub fn meta(&self) -> &RowsetMetaPb {
        &self.meta
    }

    /// Verifies every segment file pair exists under `tablet_dir`.
    pub fn check_segment_files(&self, tablet_dir: &Path) -> Result<()> {
        for ord in 0..self.meta.num_segments as u32 {
            for name in [
                segment_data_file_name(self.rowset_id(), ord),
                segment_index_file_name(self.rowset_id(), ord),
            ] {
                let path = tablet_dir.join(&name);
                if !path.exists() {
                    return Err(StorageError::internal(format!(
                        "missing segment file {} for rowset {} version {}",
                        path.display(),
                        self.rowset_id(),
                        self.version()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Allocates rowset ids and keeps issued ids reserved until their guard drops,
/// so a concurrent allocation can never hand out an id that a clone is still
/// stitching into place.
pub struct RowsetIdGenerator {
    next: AtomicI64,
    in_use: Arc<Mutex<HashSet<i64>>>,
}

impl RowsetIdGenerator {
    pub fn new(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start.max(1)),
            in_use: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn next_id(&self) -> (RowsetId, PendingRowsetGuard) {
        loop {
            let id = self.next.fetch_add(1, Ordering::AcqRel);
            let mut in_use = self.in_use.lock().expect("rowset id set lock");
            if in_use.insert(id) {
                return (
                    RowsetId::new(id),
                    PendingRowsetGuard {
                        id,
                        in_use: Arc::clone(&self.in_use),
                    },
                );
            }
        }
    }

    pub fn is_pending(&self, id: RowsetId) -> bool {
        self.in_use
            .lock()
            .expect("rowset id set lock")
            .contains(&id.as_i64())
    }
}

/// Reservation of a freshly allocated rowset id; released on drop.
#[derive(Debug)]
pub struct PendingRowsetGuard {
    id: i64,
    in_use: Arc<Mutex<HashSet<i64>>>,
}

impl PendingRowsetGuard {
    pub fn rowset_id(&self) -> RowsetId {
        RowsetId::new(self.id)
    }
}

impl Drop for PendingRowsetGuard {
    fn drop(&mut self) {
        self.in_use
            .lock()
            .expect("rowset id set lock")
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{Rowset, RowsetIdGenerator, segment_data_file_name, segment_index_file_name};
    use crate::common::ids::RowsetId;
    use crate::storage::metadata::RowsetMetaPb;

    #[test]
    fn segment_file_names_embed_rowset_id() {
        let id = RowsetId::new(12);
        assert_eq!(
            segment_data_file_name(id, 0),
            "00000000000000000012_0.dat"
        );
        assert_eq!(
            segment_index_file_name(id, 3),
            "00000000000000000012_3.idx"
        );
    }

    #[test]
    fn check_segment_files_detects_missing_index() {
        let dir = tempdir().expect("tempdir");
        let rowset = Rowset::new(RowsetMetaPb {
            rowset_id: 5,
            num_segments: 1,
            ..Default::default()
        });
        fs::write(
            dir.path().join(segment_data_file_name(RowsetId::new(5), 0)),
            b"d",
        )
        .expect("write");
        assert!(rowset.check_segment_files(dir.path()).is_err());

        fs::write(
            dir.path().join(segment_index_file_name(RowsetId::new(5), 0)),
            b"i",
        )
        .expect("write");
        rowset.check_segment_files(dir.path()).expect("complete");
    }

    #[test]
    fn pending_guard_releases_id_on_drop() {
        let generator = RowsetIdGenerator::new(100);
        let (id, guard) = generator.next_id();
        assert!(generator.is_pending(id));
        drop(guard);
        assert!(!generator.is_pending(id));
    }

    #[test]
    fn generator_never_reissues_a_pending_id() {
        let generator = RowsetIdGenerator::new(1);
        let (first, _guard) = generator.next_id();
        let (second, _guard2) = generator.next_id();
        assert_ne!(first, second);
    }
}
