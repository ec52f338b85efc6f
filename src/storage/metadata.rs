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
//! Persisted and wire-level metadata messages.
//!
//! A tablet header travels between backends as a `<tablet_id>.hdr` file and is
//! stored locally in the embedded metadata store; both carry the same encoded
//! `TabletMetaPb`.
use std::path::{Path, PathBuf};

use prost::Message;

use crate::common::ids::TabletId;
use crate::common::status::{Result, StorageError};

/// Staging directory name used while cloning into an existing tablet.
pub const CLONE_PREFIX: &str = "clone";
/// Per-tablet change-log directory.
pub const BINLOG_DIR_NAME: &str = "_binlog";
/// Sidecar manifest describing the binlog files shipped with a snapshot.
pub const BINLOG_METAS_FILE_NAME: &str = "rowset_binlog_metas.pb";
pub const HEADER_FILE_SUFFIX: &str = ".hdr";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TabletStatePb {
    Running = 0,
    /// Residue of an interrupted schema change; eligible for overwrite.
    NotReady = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct UniqueIdPb {
    #[prost(int64, tag = "1")]
    pub hi: i64,
    #[prost(int64, tag = "2")]
    pub lo: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RowsetMetaPb {
    #[prost(int64, tag = "1")]
    pub rowset_id: i64,
    #[prost(int64, tag = "2")]
    pub tablet_id: i64,
    #[prost(int64, tag = "3")]
    pub partition_id: i64,
    #[prost(int32, tag = "4")]
    pub tablet_schema_hash: i32,
    #[prost(int64, tag = "5")]
    pub start_version: i64,
    #[prost(int64, tag = "6")]
    pub end_version: i64,
    #[prost(int32, tag = "7")]
    pub num_segments: i32,
    #[prost(int64, tag = "8")]
    pub num_rows: i64,
    #[prost(int64, tag = "9")]
    pub total_disk_size: i64,
    /// Remote storage resource holding cooled segments; unset means local.
    #[prost(string, optional, tag = "10")]
    pub resource_id: Option<String>,
    #[prost(int64, tag = "11")]
    pub creation_time: i64,
}

/// Delete bitmap stored as parallel arrays, one entry per
/// (rowset, segment, version) key.
#[derive(Clone, PartialEq, Message)]
pub struct DeleteBitmapPb {
    #[prost(int64, repeated, tag = "1")]
    pub rowset_ids: Vec<i64>,
    #[prost(uint32, repeated, tag = "2")]
    pub segment_ids: Vec<u32>,
    #[prost(int64, repeated, tag = "3")]
    pub versions: Vec<i64>,
    #[prost(bytes = "vec", repeated, tag = "4")]
    pub segment_delete_bitmaps: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RowsetBinlogMetaPb {
    #[prost(int64, tag = "1")]
    pub rowset_id: i64,
    #[prost(int64, tag = "2")]
    pub version: i64,
    #[prost(int64, tag = "3")]
    pub num_files: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RowsetBinlogMetasPb {
    #[prost(message, repeated, tag = "1")]
    pub rowset_binlog_metas: Vec<RowsetBinlogMetaPb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TabletMetaPb {
    #[prost(int64, tag = "1")]
    pub table_id: i64,
    #[prost(int64, tag = "2")]
    pub partition_id: i64,
    #[prost(int64, tag = "3")]
    pub tablet_id: i64,
    #[prost(int32, tag = "4")]
    pub schema_hash: i32,
    #[prost(int64, tag = "5")]
    pub replica_id: i64,
    #[prost(int64, tag = "6")]
    pub shard_id: i64,
    #[prost(int64, tag = "7")]
    pub creation_time: i64,
    #[prost(enumeration = "TabletStatePb", tag = "8")]
    pub tablet_state: i32,
    #[prost(message, repeated, tag = "9")]
    pub rs_metas: Vec<RowsetMetaPb>,
    #[prost(message, optional, tag = "10")]
    pub cooldown_meta_id: Option<UniqueIdPb>,
    #[prost(bool, tag = "11")]
    pub enable_unique_key_merge_on_write: bool,
    #[prost(message, optional, tag = "12")]
    pub delete_bitmap: Option<DeleteBitmapPb>,
    #[prost(message, repeated, tag = "13")]
    pub rowset_binlog_metas: Vec<RowsetBinlogMetaPb>,
}

pub fn header_file_path(tablet_dir: &Path, tablet_id: TabletId) -> PathBuf {
    tablet_dir.join(format!("{}{}", tablet_id, HEADER_FILE_SUFFIX))
}

pub fn read_message<M: Message + Default>(path: &Path) -> Result<M> {
    let bytes = std::fs::read(path)?;
    M::decode(bytes.as_slice())
        .map_err(|e| StorageError::internal(format!("decode {} failed: {}", path.display(), e)))
}

pub fn write_message<M: Message>(path: &Path, message: &M) -> Result<()> {
    std::fs::write(path, message.encode_to_vec())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{RowsetMetaPb, TabletMetaPb, header_file_path, read_message, write_message};

    #[test]
    fn header_path_uses_tablet_id_and_suffix() {
        let path = header_file_path(std::path::Path::new("/data/0/10001/12345"), 10001);
        assert_eq!(path.to_string_lossy(), "/data/0/10001/12345/10001.hdr");
    }

    #[test]
    fn tablet_meta_pb_file_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("10001.hdr");
        let pb = TabletMetaPb {
            tablet_id: 10001,
            replica_id: 7,
            schema_hash: 12345,
            rs_metas: vec![RowsetMetaPb {
                rowset_id: 1,
                tablet_id: 10001,
                start_version: 0,
                end_version: 1,
                num_segments: 1,
                ..Default::default()
            }],
            ..Default::default()
        };
        write_message(&path, &pb).expect("write");
        let loaded: TabletMetaPb = read_message(&path).expect("read");
        assert_eq!(loaded, pb);
    }
}
