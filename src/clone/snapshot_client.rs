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
//! Snapshot negotiation with a source backend.
use crate::common::ids::{SchemaHash, TabletId, Version};
use crate::common::status::{Result, StorageError};

/// Snapshot format generation requested from the source.
pub const PREFERRED_SNAPSHOT_VERSION: i32 = 2;

#[derive(Clone, Debug)]
pub struct SnapshotRequest {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub preferred_snapshot_version: i32,
    /// Presence doubles as the "requested by a peer, not the controller"
    /// marker; the source prepares incremental artifacts only when set.
    pub missing_version: Option<Vec<i64>>,
    pub is_copy_binlog: bool,
    pub timeout_s: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct SnapshotResult {
    pub snapshot_path: Option<String>,
    pub allow_incremental_clone: Option<bool>,
}

/// Transport seam for the two snapshot RPCs on a source backend.
pub trait SnapshotRpc: Send + Sync {
    fn make_snapshot(&self, host: &str, port: u16, request: &SnapshotRequest)
    -> Result<SnapshotResult>;

    fn release_snapshot(&self, host: &str, port: u16, snapshot_path: &str) -> Result<()>;
}

/// Asks the source to materialize a snapshot and validates the response.
/// Returns the snapshot directory (with a trailing `/`) and whether the
/// source prepared incremental artifacts.
#[allow(clippy::too_many_arguments)]
pub fn make_snapshot(
    rpc: &dyn SnapshotRpc,
    host: &str,
    port: u16,
    tablet_id: TabletId,
    schema_hash: SchemaHash,
    version: i64,
    timeout_s: Option<i64>,
    missed_versions: &[Version],
) -> Result<(String, bool)> {
    let request = SnapshotRequest {
        tablet_id,
        schema_hash,
        version,
        preferred_snapshot_version: PREFERRED_SNAPSHOT_VERSION,
        // Always present, even when empty: missing versions are singleton
        // deltas, and the presence bit marks this request as peer-originated.
        missing_version: Some(missed_versions.iter().map(|v| v.start).collect()),
        is_copy_binlog: true,
        timeout_s: timeout_s.filter(|t| *t > 0),
    };
    let result = rpc.make_snapshot(host, port, &request)?;

    let Some(mut snapshot_path) = result.snapshot_path else {
        return Err(StorageError::internal(
            "success snapshot request without snapshot path",
        ));
    };
    if !snapshot_path.ends_with('/') {
        snapshot_path.push('/');
    }
    Ok((snapshot_path, result.allow_incremental_clone.unwrap_or(false)))
}

pub fn release_snapshot(
    rpc: &dyn SnapshotRpc,
    host: &str,
    port: u16,
    snapshot_path: &str,
) -> Result<()> {
    rpc.release_snapshot(host, port, snapshot_path)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::{SnapshotRequest, SnapshotResult, SnapshotRpc, make_snapshot};
    use crate::common::ids::Version;
    use crate::common::status::{Result, StorageError};

    struct RecordingRpc {
        result: SnapshotResult,
        seen: Mutex<Option<SnapshotRequest>>,
    }

    impl SnapshotRpc for RecordingRpc {
        fn make_snapshot(
            &self,
            _host: &str,
            _port: u16,
            request: &SnapshotRequest,
        ) -> Result<SnapshotResult> {
            *self.seen.lock().expect("seen lock") = Some(request.clone());
            Ok(self.result.clone())
        }

        fn release_snapshot(&self, _host: &str, _port: u16, _snapshot_path: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn make_snapshot_normalizes_trailing_slash() {
        let rpc = RecordingRpc {
            result: SnapshotResult {
                snapshot_path: Some("/backend/snapshot/20260801".to_string()),
                allow_incremental_clone: Some(true),
            },
            seen: Mutex::new(None),
        };
        let (path, incremental) = make_snapshot(
            &rpc,
            "10.0.0.1",
            9060,
            10001,
            12345,
            7,
            None,
            &[Version::singleton(5), Version::singleton(6)],
        )
        .expect("make snapshot");
        assert_eq!(path, "/backend/snapshot/20260801/");
        assert!(incremental);

        let seen = rpc.seen.lock().expect("seen lock").clone().expect("request");
        assert_eq!(seen.missing_version, Some(vec![5, 6]));
        assert!(seen.is_copy_binlog);
    }

    #[test]
    fn make_snapshot_requires_snapshot_path() {
        let rpc = RecordingRpc {
            result: SnapshotResult::default(),
            seen: Mutex::new(None),
        };
        let err = make_snapshot(&rpc, "10.0.0.1", 9060, 10001, 12345, 7, None, &[]).unwrap_err();
        assert!(matches!(err, StorageError::InternalError(_)));
    }

    #[test]
    fn make_snapshot_sends_presence_bit_with_empty_list() {
        let rpc = RecordingRpc {
            result: SnapshotResult {
                snapshot_path: Some("/s/".to_string()),
                allow_incremental_clone: None,
            },
            seen: Mutex::new(None),
        };
        let (_, incremental) =
            make_snapshot(&rpc, "10.0.0.1", 9060, 10001, 12345, 7, Some(30), &[])
                .expect("make snapshot");
        assert!(!incremental);
        let seen = rpc.seen.lock().expect("seen lock").clone().expect("request");
        assert_eq!(seen.missing_version, Some(Vec::new()));
        assert_eq!(seen.timeout_s, Some(30));
    }
}
