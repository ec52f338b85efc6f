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
//! Shared clone-test harness: an in-process source backend with a real
//! download service and a fake snapshot RPC routed by backend address.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use prost::Message;
use tempfile::TempDir;

use silica::clone::snapshot_client::{SnapshotRequest, SnapshotResult, SnapshotRpc};
use silica::clone::task::{BackendAddr, CloneRequest, ClusterInfo};
use silica::common::status::{Result, StorageError};
use silica::service::download_service::{DownloadServiceHandle, start_download_service};
use silica::storage::data_dir::StorageMedium;
use silica::storage::engine::StorageEngine;
use silica::storage::metadata::{
    BINLOG_METAS_FILE_NAME, RowsetBinlogMetasPb, RowsetMetaPb, TabletMetaPb, header_file_path,
};
use silica::storage::rowset::{segment_data_file_name, segment_index_file_name};
use silica::storage::tablet::Tablet;
use silica::storage::tablet_manager::TabletInfo;
use silica::storage::tablet_meta::TabletMeta;
use silica::{EngineCloneTask, silica_config, silica_logging};

pub const TEST_TOKEN: &str = "cluster-token-for-tests";

/// Writes a config file once per test process and loads it. `extra` lets a
/// test binary flip process-wide options (batch download, debug points).
pub fn init_test_config(extra: &str) {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let path = std::env::temp_dir().join(format!("silica-test-{}.toml", std::process::id()));
        let contents = format!(
            r#"
log_level = "warn"

[clone]
download_file_max_retry = 2
download_low_speed_time = 5
list_remote_file_timeout_s = 5
get_length_timeout_s = 5
{extra}
"#
        );
        fs::write(&path, contents).expect("write test config");
        silica_config::init_from_path(&path).expect("init test config");
        silica_logging::init_with_level("warn");
    });
}

/// What a source backend holds for one tablet.
pub struct SourceTablet {
    pub meta: TabletMetaPb,
    pub allow_incremental: bool,
    /// Shipped as-is into the snapshot directory (`*.binlog` and friends).
    pub binlog_files: Vec<(String, Vec<u8>)>,
    pub binlog_sidecar: Option<RowsetBinlogMetasPb>,
}

impl SourceTablet {
    pub fn full(meta: TabletMetaPb) -> Self {
        Self {
            meta,
            allow_incremental: false,
            binlog_files: Vec::new(),
            binlog_sidecar: None,
        }
    }

    pub fn incremental(meta: TabletMetaPb) -> Self {
        Self {
            meta,
            allow_incremental: true,
            binlog_files: Vec::new(),
            binlog_sidecar: None,
        }
    }
}

pub struct FakePeerState {
    root: PathBuf,
    tablets: Mutex<HashMap<i64, SourceTablet>>,
    make_calls: AtomicUsize,
    release_calls: AtomicUsize,
    pub fail_make_snapshot: AtomicBool,
    seq: AtomicUsize,
}

impl FakePeerState {
    pub fn serve_tablet(&self, tablet: SourceTablet) {
        self.tablets
            .lock()
            .expect("tablets lock")
            .insert(tablet.meta.tablet_id, tablet);
    }

    pub fn make_calls(&self) -> usize {
        self.make_calls.load(Ordering::Acquire)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::Acquire)
    }

    fn make_snapshot_impl(&self, request: &SnapshotRequest) -> Result<SnapshotResult> {
        self.make_calls.fetch_add(1, Ordering::AcqRel);
        if self.fail_make_snapshot.load(Ordering::Acquire) {
            return Err(StorageError::PeerUnavailable(
                "injected make_snapshot failure".to_string(),
            ));
        }
        let tablets = self.tablets.lock().expect("tablets lock");
        let Some(source) = tablets.get(&request.tablet_id) else {
            return Err(StorageError::NotFound(format!(
                "source has no tablet {}",
                request.tablet_id
            )));
        };

        let incremental = source.allow_incremental
            && request.missing_version.as_ref().is_some_and(|missing| {
                !missing.is_empty()
                    && missing.iter().all(|v| {
                        source
                            .meta
                            .rs_metas
                            .iter()
                            .any(|rs| rs.start_version == *v && rs.end_version == *v)
                    })
            });

        let selected: Vec<RowsetMetaPb> = if incremental {
            let missing = request.missing_version.as_ref().expect("missing set");
            source
                .meta
                .rs_metas
                .iter()
                .filter(|rs| {
                    rs.start_version == rs.end_version && missing.contains(&rs.start_version)
                })
                .cloned()
                .collect()
        } else {
            source.meta.rs_metas.clone()
        };

        let seq = self.seq.fetch_add(1, Ordering::AcqRel);
        let snapshot_dir = self.root.join("snapshot").join(seq.to_string());
        let content_dir = snapshot_dir
            .join(request.tablet_id.to_string())
            .join(request.schema_hash.to_string());
        fs::create_dir_all(&content_dir)?;

        for rs in &selected {
            for ord in 0..rs.num_segments as u32 {
                let id = silica::common::ids::RowsetId::new(rs.rowset_id);
                fs::write(
                    content_dir.join(segment_data_file_name(id, ord)),
                    segment_payload(rs.rowset_id, ord),
                )?;
                fs::write(
                    content_dir.join(segment_index_file_name(id, ord)),
                    index_payload(rs.rowset_id, ord),
                )?;
            }
        }

        if request.is_copy_binlog {
            for (name, payload) in &source.binlog_files {
                fs::write(content_dir.join(name), payload)?;
            }
            if let Some(sidecar) = &source.binlog_sidecar {
                fs::write(
                    content_dir.join(BINLOG_METAS_FILE_NAME),
                    sidecar.encode_to_vec(),
                )?;
            }
        }

        let mut header = source.meta.clone();
        header.rs_metas = selected;
        fs::write(
            header_file_path(&content_dir, request.tablet_id),
            header.encode_to_vec(),
        )?;

        // No trailing slash: the client normalizes.
        Ok(SnapshotResult {
            snapshot_path: Some(snapshot_dir.to_string_lossy().into_owned()),
            allow_incremental_clone: Some(incremental),
        })
    }
}

/// One in-process source backend: fake snapshot RPC state plus a live
/// download service over its snapshot directories.
pub struct TestPeer {
    pub state: Arc<FakePeerState>,
    pub be_port: u16,
    service: DownloadServiceHandle,
    _root: TempDir,
}

impl TestPeer {
    pub fn start(be_port: u16) -> Self {
        let root = tempfile::tempdir().expect("peer tempdir");
        let service = start_download_service(
            "127.0.0.1:0".parse().expect("bind addr"),
            TEST_TOKEN.to_string(),
        )
        .expect("start download service");
        let state = Arc::new(FakePeerState {
            root: root.path().to_path_buf(),
            tablets: Mutex::new(HashMap::new()),
            make_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
            fail_make_snapshot: AtomicBool::new(false),
            seq: AtomicUsize::new(0),
        });
        Self {
            state,
            be_port,
            service,
            _root: root,
        }
    }

    pub fn backend_addr(&self) -> BackendAddr {
        BackendAddr {
            host: "127.0.0.1".to_string(),
            be_port: self.be_port,
            http_port: self.service.addr().port(),
        }
    }

    /// Path fragment unique to this peer's snapshot files.
    pub fn snapshot_path_fragment(&self) -> String {
        self.state.root.to_string_lossy().into_owned()
    }
}

/// Routes snapshot RPCs to registered peers by `(host, be_port)`.
pub struct FakeSnapshotRpc {
    peers: Mutex<HashMap<(String, u16), Arc<FakePeerState>>>,
}

impl FakeSnapshotRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, peer: &TestPeer) {
        self.peers.lock().expect("peers lock").insert(
            ("127.0.0.1".to_string(), peer.be_port),
            Arc::clone(&peer.state),
        );
    }

    fn peer(&self, host: &str, port: u16) -> Result<Arc<FakePeerState>> {
        self.peers
            .lock()
            .expect("peers lock")
            .get(&(host.to_string(), port))
            .cloned()
            .ok_or_else(|| {
                StorageError::PeerUnavailable(format!("no backend at {}:{}", host, port))
            })
    }
}

impl SnapshotRpc for FakeSnapshotRpc {
    fn make_snapshot(
        &self,
        host: &str,
        port: u16,
        request: &SnapshotRequest,
    ) -> Result<SnapshotResult> {
        self.peer(host, port)?.make_snapshot_impl(request)
    }

    fn release_snapshot(&self, host: &str, port: u16, _snapshot_path: &str) -> Result<()> {
        self.peer(host, port)?
            .release_calls
            .fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

pub fn segment_payload(rowset_id: i64, ord: u32) -> Vec<u8> {
    format!("segment-data-{}-{}", rowset_id, ord).into_bytes()
}

pub fn index_payload(rowset_id: i64, ord: u32) -> Vec<u8> {
    format!("segment-index-{}-{}", rowset_id, ord).into_bytes()
}

pub struct TestEnv {
    pub engine: Arc<StorageEngine>,
    _tmp: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("engine tempdir");
        let engine = StorageEngine::open(&[tmp.path().join("disk0")]).expect("open engine");
        Self { engine, _tmp: tmp }
    }
}

/// Builds a source-side tablet header with one single-segment rowset per
/// version range, rowset ids counted up from `rowset_id_base`.
pub fn source_meta(
    tablet_id: i64,
    schema_hash: i32,
    replica_id: i64,
    versions: &[(i64, i64)],
    rowset_id_base: i64,
) -> TabletMetaPb {
    TabletMetaPb {
        table_id: 1,
        partition_id: 2,
        tablet_id,
        schema_hash,
        replica_id,
        rs_metas: versions
            .iter()
            .enumerate()
            .map(|(i, (start, end))| RowsetMetaPb {
                rowset_id: rowset_id_base + i as i64,
                tablet_id,
                partition_id: 2,
                tablet_schema_hash: schema_hash,
                start_version: *start,
                end_version: *end,
                num_segments: 1,
                num_rows: 10,
                total_disk_size: 100,
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Materializes an existing local tablet replica: meta in the store, segment
/// files on disk, registered with the manager.
pub fn create_local_tablet(
    engine: &Arc<StorageEngine>,
    tablet_id: i64,
    schema_hash: i32,
    replica_id: i64,
    versions: &[(i64, i64)],
    merge_on_write: bool,
) -> Arc<Tablet> {
    let data_dir = Arc::clone(&engine.data_dirs()[0]);
    let shard_path = data_dir.allocate_shard().expect("shard");
    let tablet_dir = shard_path
        .join(tablet_id.to_string())
        .join(schema_hash.to_string());
    fs::create_dir_all(&tablet_dir).expect("tablet dir");

    let mut pb = source_meta(tablet_id, schema_hash, replica_id, versions, 9000);
    pb.enable_unique_key_merge_on_write = merge_on_write;
    for rs in &pb.rs_metas {
        let id = silica::common::ids::RowsetId::new(rs.rowset_id);
        fs::write(
            tablet_dir.join(segment_data_file_name(id, 0)),
            segment_payload(rs.rowset_id, 0),
        )
        .expect("segment data");
        fs::write(
            tablet_dir.join(segment_index_file_name(id, 0)),
            index_payload(rs.rowset_id, 0),
        )
        .expect("segment index");
    }

    let meta = TabletMeta::from_pb(&pb).expect("meta");
    data_dir
        .meta_store()
        .save_tablet_meta(&meta)
        .expect("save meta");
    let tablet = Tablet::new(meta, data_dir, tablet_dir);
    engine
        .tablet_manager()
        .add_tablet(Arc::clone(&tablet))
        .expect("register tablet");
    tablet
}

pub fn clone_request(
    tablet_id: i64,
    schema_hash: i32,
    replica_id: i64,
    version: i64,
    src_backends: Vec<BackendAddr>,
) -> CloneRequest {
    CloneRequest {
        tablet_id,
        schema_hash,
        replica_id,
        table_id: 1,
        partition_id: 2,
        version,
        storage_medium: StorageMedium::Hdd,
        dest_path_hash: 0,
        src_backends,
        timeout_s: Some(60),
    }
}

pub fn run_clone(
    engine: &Arc<StorageEngine>,
    rpc: Arc<FakeSnapshotRpc>,
    request: CloneRequest,
) -> (Result<()>, Vec<TabletInfo>) {
    let mut task = EngineCloneTask::new(
        Arc::clone(engine),
        rpc,
        request,
        ClusterInfo {
            token: TEST_TOKEN.to_string(),
        },
        1,
    );
    let mut infos = Vec::new();
    let result = task.execute(&mut infos);
    (result, infos)
}
