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
//! Rowset identity rewriting for downloaded snapshots.
//!
//! Copied artifacts become owned by the destination replica without re-reading
//! data: fresh rowset ids are allocated (and reserved until the clone ends),
//! staged file names are renamed to the new ids, and the staged header gets
//! the destination's replica, table, partition, and schema-hash identity.
use std::collections::HashMap;
use std::path::Path;

use crate::common::ids::{PartitionId, ReplicaId, RowsetId, SchemaHash, TableId, TabletId};
use crate::common::status::{Result, StorageError};
use crate::silica_logging::info;
use crate::storage::metadata::{
    BINLOG_METAS_FILE_NAME, RowsetBinlogMetasPb, TabletMetaPb, header_file_path, read_message,
    write_message,
};
use crate::storage::rowset::{PendingRowsetGuard, RowsetIdGenerator};

pub struct ConvertTarget {
    pub tablet_id: TabletId,
    pub replica_id: ReplicaId,
    pub table_id: TableId,
    pub partition_id: PartitionId,
    pub schema_hash: SchemaHash,
}

/// Rewrites the staged header and file names in `clone_dir` to the target
/// identity. Returns the guards reserving the newly issued rowset ids.
pub fn convert_rowset_ids(
    generator: &RowsetIdGenerator,
    clone_dir: &Path,
    target: &ConvertTarget,
) -> Result<Vec<PendingRowsetGuard>> {
    let header_path = header_file_path(clone_dir, target.tablet_id);
    if !header_path.exists() {
        return Err(StorageError::InconsistentSnapshot(format!(
            "tablet header missing from snapshot: {}",
            header_path.display()
        )));
    }
    let mut header: TabletMetaPb = read_message(&header_path)?;

    header.tablet_id = target.tablet_id;
    header.replica_id = target.replica_id;
    header.table_id = target.table_id;
    header.partition_id = target.partition_id;
    header.schema_hash = target.schema_hash;

    let mut guards = Vec::with_capacity(header.rs_metas.len());
    let mut id_mapping: HashMap<i64, i64> = HashMap::new();
    for rs_meta in &mut header.rs_metas {
        let (new_id, guard) = generator.next_id();
        id_mapping.insert(rs_meta.rowset_id, new_id.as_i64());
        rs_meta.rowset_id = new_id.as_i64();
        rs_meta.tablet_id = target.tablet_id;
        rs_meta.partition_id = target.partition_id;
        rs_meta.tablet_schema_hash = target.schema_hash;
        guards.push(guard);
    }

    rename_staged_files(clone_dir, &id_mapping)?;

    if let Some(delete_bitmap) = &mut header.delete_bitmap {
        for rowset_id in &mut delete_bitmap.rowset_ids {
            if let Some(new_id) = id_mapping.get(rowset_id) {
                *rowset_id = *new_id;
            }
        }
    }
    for binlog_meta in &mut header.rowset_binlog_metas {
        if let Some(new_id) = id_mapping.get(&binlog_meta.rowset_id) {
            binlog_meta.rowset_id = *new_id;
        }
    }
    rewrite_binlog_sidecar(clone_dir, &id_mapping)?;

    write_message(&header_path, &header)?;
    info!(
        "converted rowset ids in snapshot: tablet_id={} replica_id={} rowsets={}",
        target.tablet_id,
        target.replica_id,
        id_mapping.len()
    );
    Ok(guards)
}

/// Renames every staged file carrying an old rowset-id prefix
/// (`<rowset_id>_...`) to its new id. Files without a rowset prefix are
/// left untouched.
fn rename_staged_files(clone_dir: &Path, id_mapping: &HashMap<i64, i64>) -> Result<()> {
    let prefix_mapping: HashMap<String, String> = id_mapping
        .iter()
        .map(|(old, new)| {
            (
                format!("{}_", RowsetId::new(*old)),
                format!("{}_", RowsetId::new(*new)),
            )
        })
        .collect();
    for entry in std::fs::read_dir(clone_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        for (old_prefix, new_prefix) in &prefix_mapping {
            if let Some(rest) = name.strip_prefix(old_prefix) {
                let new_name = format!("{}{}", new_prefix, rest);
                std::fs::rename(entry.path(), clone_dir.join(new_name))?;
                break;
            }
        }
    }
    Ok(())
}

fn rewrite_binlog_sidecar(clone_dir: &Path, id_mapping: &HashMap<i64, i64>) -> Result<()> {
    let sidecar_path = clone_dir.join(BINLOG_METAS_FILE_NAME);
    if !sidecar_path.exists() || std::fs::metadata(&sidecar_path)?.len() == 0 {
        return Ok(());
    }
    let mut sidecar: RowsetBinlogMetasPb = read_message(&sidecar_path)?;
    for meta in &mut sidecar.rowset_binlog_metas {
        if let Some(new_id) = id_mapping.get(&meta.rowset_id) {
            meta.rowset_id = *new_id;
        }
    }
    write_message(&sidecar_path, &sidecar)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{ConvertTarget, convert_rowset_ids};
    use crate::common::ids::RowsetId;
    use crate::storage::metadata::{
        RowsetMetaPb, TabletMetaPb, header_file_path, read_message, write_message,
    };
    use crate::storage::rowset::{RowsetIdGenerator, segment_data_file_name};

    #[test]
    fn convert_rewrites_identity_and_renames_files() {
        let dir = tempdir().expect("tempdir");
        let clone_dir = dir.path();
        let old_id = RowsetId::new(11);
        write_message(
            &header_file_path(clone_dir, 10001),
            &TabletMetaPb {
                tablet_id: 10001,
                schema_hash: 999,
                replica_id: 1,
                table_id: 1,
                partition_id: 1,
                rs_metas: vec![RowsetMetaPb {
                    rowset_id: old_id.as_i64(),
                    tablet_id: 10001,
                    partition_id: 1,
                    tablet_schema_hash: 999,
                    start_version: 0,
                    end_version: 1,
                    num_segments: 1,
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .expect("write header");
        fs::write(clone_dir.join(segment_data_file_name(old_id, 0)), b"d").expect("write");

        let generator = RowsetIdGenerator::new(500);
        let target = ConvertTarget {
            tablet_id: 10001,
            replica_id: 7,
            table_id: 2,
            partition_id: 3,
            schema_hash: 12345,
        };
        let guards = convert_rowset_ids(&generator, clone_dir, &target).expect("convert");
        assert_eq!(guards.len(), 1);
        let new_id = guards[0].rowset_id();

        let header: TabletMetaPb =
            read_message(&header_file_path(clone_dir, 10001)).expect("read header");
        assert_eq!(header.replica_id, 7);
        assert_eq!(header.table_id, 2);
        assert_eq!(header.partition_id, 3);
        assert_eq!(header.schema_hash, 12345);
        assert_eq!(header.rs_metas[0].rowset_id, new_id.as_i64());
        assert_eq!(header.rs_metas[0].tablet_schema_hash, 12345);

        assert!(clone_dir.join(segment_data_file_name(new_id, 0)).exists());
        assert!(!clone_dir.join(segment_data_file_name(old_id, 0)).exists());

        assert!(generator.is_pending(new_id));
        drop(guards);
        assert!(!generator.is_pending(new_id));
    }

    #[test]
    fn convert_without_header_is_inconsistent() {
        let dir = tempdir().expect("tempdir");
        let generator = RowsetIdGenerator::new(1);
        let target = ConvertTarget {
            tablet_id: 10001,
            replica_id: 7,
            table_id: 2,
            partition_id: 3,
            schema_hash: 12345,
        };
        let err = convert_rowset_ids(&generator, dir.path(), &target).unwrap_err();
        assert!(matches!(
            err,
            crate::common::status::StorageError::InconsistentSnapshot(_)
        ));
    }
}
