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
//! The clone task: makes a local tablet replica equivalent to (a prefix of) a
//! source replica, atomically, without losing data the local replica already
//! has.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scopeguard::guard;

use crate::clone::binlog::{
    BINLOG_FILE_SUFFIX, BINLOG_INDEX_FILE_SUFFIX, check_dest_binlog_valid,
};
use crate::clone::download::{self, HTTP_REQUEST_PREFIX};
use crate::clone::snapshot_client::{self, SnapshotRpc};
use crate::common::debug_points;
use crate::common::ids::{
    PartitionId, ReplicaId, SchemaHash, TableId, TabletId, UniqueId, Version,
};
use crate::common::status::{Result, StorageError};
use crate::common::util::{list_file_names, remove_dir_all_if_exists};
use crate::common::{config, util};
use crate::silica_logging::{debug, info, warn};
use crate::storage::data_dir::{DataDir, StorageMedium};
use crate::storage::engine::StorageEngine;
use crate::storage::metadata::{
    BINLOG_DIR_NAME, BINLOG_METAS_FILE_NAME, CLONE_PREFIX, RowsetBinlogMetasPb, header_file_path,
    read_message,
};
use crate::storage::rowset::{PendingRowsetGuard, Rowset};
use crate::storage::snapshot_manager::{ConvertTarget, convert_rowset_ids};
use crate::storage::tablet::{K_INVALID_CUMULATIVE_POINT, Tablet};
use crate::storage::tablet_manager::TabletInfo;
use crate::storage::tablet_meta::{TabletMeta, TabletState};

#[derive(Clone, Debug)]
pub struct BackendAddr {
    pub host: String,
    pub be_port: u16,
    pub http_port: u16,
}

#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// Shared secret authenticating snapshot file requests between backends.
    pub token: String,
}

#[derive(Clone, Debug)]
pub struct CloneRequest {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub replica_id: ReplicaId,
    pub table_id: TableId,
    pub partition_id: PartitionId,
    /// Visible version the replica must reach.
    pub version: i64,
    pub storage_medium: StorageMedium,
    pub dest_path_hash: i64,
    /// Candidate sources, tried in order.
    pub src_backends: Vec<BackendAddr>,
    pub timeout_s: Option<i64>,
}

/// One clone execution. Runs on an engine worker thread; blocking I/O
/// (snapshot RPC, HTTP transfer, file linking) happens inline.
pub struct EngineCloneTask {
    engine: Arc<StorageEngine>,
    snapshot_rpc: Arc<dyn SnapshotRpc>,
    clone_req: CloneRequest,
    cluster_info: ClusterInfo,
    signature: i64,
    is_new_tablet: bool,
    copy_size: i64,
    copy_time_ms: i64,
    /// Reservations for the rowset ids minted during identity rewrite; held
    /// until the task ends so concurrent allocation cannot reuse them.
    pending_rs_guards: Vec<PendingRowsetGuard>,
}

impl EngineCloneTask {
    pub fn new(
        engine: Arc<StorageEngine>,
        snapshot_rpc: Arc<dyn SnapshotRpc>,
        clone_req: CloneRequest,
        cluster_info: ClusterInfo,
        signature: i64,
    ) -> Self {
        Self {
            engine,
            snapshot_rpc,
            clone_req,
            cluster_info,
            signature,
            is_new_tablet: false,
            copy_size: 0,
            copy_time_ms: 0,
            pending_rs_guards: Vec::new(),
        }
    }

    pub fn copy_size(&self) -> i64 {
        self.copy_size
    }

    pub fn copy_time_ms(&self) -> i64 {
        self.copy_time_ms
    }

    /// Runs the clone and appends the resulting replica report to
    /// `tablet_infos`. The partition visible version is recorded whether the
    /// clone succeeded or not.
    pub fn execute(&mut self, tablet_infos: &mut Vec<TabletInfo>) -> Result<()> {
        let result = self.do_clone(tablet_infos);
        self.engine
            .tablet_manager()
            .update_partitions_visible_version(&[(
                self.clone_req.partition_id,
                self.clone_req.version,
            )]);
        result
    }

    fn do_clone(&mut self, tablet_infos: &mut Vec<TabletInfo>) -> Result<()> {
        if let Some(point) = debug_points::lookup("EngineCloneTask.wait_clone") {
            let duration_ms = point.param_i64("duration", 10_000).max(0) as u64;
            std::thread::sleep(Duration::from_millis(duration_ms));
        }
        if debug_points::lookup("EngineCloneTask.failed_clone").is_some() {
            warn!(
                "EngineCloneTask.failed_clone: tablet_id={} replica_id={} version={}",
                self.clone_req.tablet_id, self.clone_req.replica_id, self.clone_req.version
            );
            return Err(StorageError::internal(format!(
                "in debug point, EngineCloneTask.failed_clone tablet={}, replica={}, version={}",
                self.clone_req.tablet_id, self.clone_req.replica_id, self.clone_req.version
            )));
        }

        let tablet_manager = Arc::clone(self.engine.tablet_manager());
        tablet_manager.register_transition_tablet(self.clone_req.tablet_id, "clone")?;
        let _transition = guard(
            (Arc::clone(&tablet_manager), self.clone_req.tablet_id),
            |(manager, tablet_id)| {
                manager.unregister_transition_tablet(tablet_id, "clone");
            },
        );

        let mut tablet = tablet_manager.get_tablet(self.clone_req.tablet_id);

        // A NotReady tablet is residue of an interrupted schema change; drop
        // it and clone from scratch.
        if let Some(existing) = &tablet {
            if existing.tablet_state() == TabletState::NotReady {
                warn!(
                    "tablet state is not ready when clone, need to drop old tablet, tablet_id={}",
                    existing.tablet_id()
                );
                tablet_manager.drop_tablet(existing.tablet_id(), existing.replica_id(), false)?;
                tablet = None;
            }
        }
        self.is_new_tablet = tablet.is_none();

        match tablet {
            Some(tablet) => self.clone_to_existing_tablet(&tablet)?,
            None => self.clone_new_tablet()?,
        }

        self.set_tablet_info(tablet_infos)
    }

    fn clone_to_existing_tablet(&mut self, tablet: &Arc<Tablet>) -> Result<()> {
        let _migration_guard = tablet.try_migration_read()?;

        if tablet.replica_id() < self.clone_req.replica_id {
            // The local replica may already be dropped in the controller and
            // replaced by a newer one landing here; the requested id is
            // authoritative.
            tablet.set_replica_id(self.clone_req.replica_id)?;
        }

        let local_data_path = tablet.tablet_path().join(CLONE_PREFIX);

        let mut specified_version = self.clone_req.version;
        if tablet.enable_unique_key_merge_on_write() {
            let min_pending_ver = self
                .engine
                .get_pending_publish_min_version(tablet.tablet_id());
            if min_pending_ver - 1 < specified_version {
                info!(
                    "use min pending publish version for clone, min_pending_ver: {} visible_version: {}",
                    min_pending_ver, self.clone_req.version
                );
                specified_version = min_pending_ver - 1;
            }
        }

        let missed_versions = tablet.calc_missed_versions(specified_version);

        // Without missing versions there is nothing to pull; the source would
        // return only a header and the clone would fail anyway.
        if missed_versions.is_empty() {
            info!(
                "missed version size = 0, skip clone and return success. tablet_id={} replica_id={}",
                self.clone_req.tablet_id, self.clone_req.replica_id
            );
            return Ok(());
        }

        info!(
            "clone to existed tablet. missed_versions_size={}, signature={}, tablet_id={}, visible_version={}, replica_id={}",
            missed_versions.len(),
            self.signature,
            self.clone_req.tablet_id,
            self.clone_req.version,
            self.clone_req.replica_id
        );

        let allow_incremental_clone = match self.make_and_download_snapshots(
            tablet.data_dir(),
            &local_data_path,
            &missed_versions,
        ) {
            Ok(allow) => allow,
            Err(e) => {
                // The staging dir must not outlive the attempt.
                if let Err(rm_err) = remove_dir_all_if_exists(&local_data_path) {
                    warn!(
                        "failed to remove {}: {}",
                        local_data_path.display(),
                        rm_err
                    );
                }
                return Err(e);
            }
        };
        self.finish_clone(
            tablet,
            &local_data_path,
            specified_version,
            allow_incremental_clone,
        )
    }

    fn clone_new_tablet(&mut self) -> Result<()> {
        info!(
            "clone tablet not exist, begin clone a new tablet from remote be. signature={}, tablet_id={}, visible_version={}, req replica={}",
            self.signature,
            self.clone_req.tablet_id,
            self.clone_req.version,
            self.clone_req.replica_id
        );

        let (shard_root, store) = self.engine.obtain_shard_path(
            self.clone_req.storage_medium,
            self.clone_req.dest_path_hash,
            self.clone_req.partition_id,
        )?;
        let tablet_dir = shard_root
            .join(self.clone_req.tablet_id.to_string())
            .join(self.clone_req.schema_hash.to_string());

        let result = self.clone_new_tablet_inner(&store, &tablet_dir);
        if result.is_err() {
            info!(
                "clone failed. want to delete local dir: {}. signature: {}",
                tablet_dir.display(),
                self.signature
            );
            if let Err(e) = remove_dir_all_if_exists(&tablet_dir) {
                warn!("failed to delete useless clone dir {}: {}", tablet_dir.display(), e);
            }
            if let Err(e) = DataDir::delete_tablet_parent_path_if_empty(&tablet_dir) {
                warn!("failed to delete parent dir of {}: {}", tablet_dir.display(), e);
            }
        }
        result
    }

    fn clone_new_tablet_inner(&mut self, store: &Arc<DataDir>, tablet_dir: &Path) -> Result<()> {
        if tablet_dir.exists() {
            // Leftovers of an earlier failed clone; same names may carry
            // different versions.
            warn!(
                "before clone dest path={} exist, remove it first",
                tablet_dir.display()
            );
            remove_dir_all_if_exists(tablet_dir)?;
        }

        self.make_and_download_snapshots(store, tablet_dir, &[])?;
        info!("clone copy done. tablet_dir: {}", tablet_dir.display());

        let tablet_manager = self.engine.tablet_manager();
        let tablet = tablet_manager.load_tablet_from_dir(
            store,
            self.clone_req.tablet_id,
            self.clone_req.schema_hash,
            tablet_dir,
        )?;
        // MUST reset `replica_id` to the request's to keep consistent with
        // the controller.
        tablet.set_replica_id(self.clone_req.replica_id)?;

        // The header now lives in the metadata store; its file must not
        // survive in the tablet dir.
        let header_path = header_file_path(tablet_dir, self.clone_req.tablet_id);
        fs::remove_file(&header_path)?;
        Ok(())
    }

    fn set_tablet_info(&self, tablet_infos: &mut Vec<TabletInfo>) -> Result<()> {
        let mut tablet_info = TabletInfo {
            tablet_id: self.clone_req.tablet_id,
            replica_id: self.clone_req.replica_id,
            schema_hash: self.clone_req.schema_hash,
            ..Default::default()
        };
        self.engine
            .tablet_manager()
            .report_tablet_info(&mut tablet_info)?;
        if tablet_info.version < self.clone_req.version {
            // An incremental clone keeps the local tablet; a freshly cloned
            // tablet below the expected version is stale remains and is
            // dropped.
            if self.is_new_tablet {
                warn!(
                    "begin to drop the stale tablet. tablet_id:{}, replica_id:{}, schema_hash:{}, signature:{}, version:{}, expected_version: {}",
                    self.clone_req.tablet_id,
                    self.clone_req.replica_id,
                    self.clone_req.schema_hash,
                    self.signature,
                    tablet_info.version,
                    self.clone_req.version
                );
                if let Err(e) = self.engine.tablet_manager().drop_tablet(
                    self.clone_req.tablet_id,
                    self.clone_req.replica_id,
                    false,
                ) {
                    warn!("drop stale cloned table failed: {}", e);
                }
            }
            return Err(StorageError::UnexpectedVersion {
                actual: tablet_info.version,
                expected: self.clone_req.version,
            });
        }
        info!(
            "clone get tablet info success. tablet_id:{}, schema_hash:{}, signature:{}, replica_id:{}, version:{}",
            self.clone_req.tablet_id,
            self.clone_req.schema_hash,
            self.signature,
            self.clone_req.replica_id,
            tablet_info.version
        );
        tablet_infos.push(tablet_info);
        Ok(())
    }

    /// Tries each candidate source in turn: make a snapshot, download it,
    /// rewrite rowset identity. The snapshot is released best-effort on every
    /// exit from an attempt. Returns whether the winning source prepared
    /// incremental artifacts.
    fn make_and_download_snapshots(
        &mut self,
        data_dir: &Arc<DataDir>,
        local_data_path: &Path,
        missed_versions: &[Version],
    ) -> Result<bool> {
        let token = self.cluster_info.token.clone();
        let src_backends = self.clone_req.src_backends.clone();
        let mut last_status: Option<StorageError> = None;

        for src in &src_backends {
            let make_result = snapshot_client::make_snapshot(
                self.snapshot_rpc.as_ref(),
                &src.host,
                src.be_port,
                self.clone_req.tablet_id,
                self.clone_req.schema_hash,
                self.clone_req.version,
                self.clone_req.timeout_s,
                missed_versions,
            );
            let (snapshot_path, allow_incremental_clone) = match make_result {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "failed to make snapshot in remote BE: host={} port={} tablet={} signature={} missed_versions={} error={}",
                        src.host,
                        src.be_port,
                        self.clone_req.tablet_id,
                        self.signature,
                        missed_versions.len(),
                        e
                    );
                    last_status = Some(e);
                    continue; // Try another BE
                }
            };
            info!(
                "successfully make snapshot in remote BE: host={} port={} tablet={} snapshot_path={} signature={}",
                src.host, src.be_port, self.clone_req.tablet_id, snapshot_path, self.signature
            );
            let _release = guard(
                (
                    Arc::clone(&self.snapshot_rpc),
                    src.host.clone(),
                    src.be_port,
                    snapshot_path.clone(),
                ),
                |(rpc, host, port, path)| {
                    if let Err(e) = snapshot_client::release_snapshot(rpc.as_ref(), &host, port, &path)
                    {
                        warn!(
                            "failed to release snapshot in remote BE: host={} port={} snapshot_path={} error={}",
                            host, port, path, e
                        );
                    }
                },
            );

            // snapshot_path carries a trailing '/'.
            let remote_dir = format!(
                "{}{}/{}/",
                snapshot_path, self.clone_req.tablet_id, self.clone_req.schema_hash
            );
            let address = format!("{}:{}", src.host, src.http_port);

            let download_result = if config::enable_batch_download()
                && download::is_support_batch_download(&address, &token)
            {
                info!(
                    "remote BE supports batch download, use batch file download: address={} remote_dir={}",
                    address, remote_dir
                );
                download::batch_download_files(data_dir, &address, &token, &remote_dir, local_data_path)
            } else {
                if config::enable_batch_download() {
                    info!(
                        "remote BE does not support batch download, use single file download: address={} remote_dir={}",
                        address, remote_dir
                    );
                } else {
                    info!(
                        "batch download is disabled, use single file download: address={} remote_dir={}",
                        address, remote_dir
                    );
                }
                let remote_url_prefix = format!(
                    "http://{}{}?token={}&file={}",
                    address, HTTP_REQUEST_PREFIX, token, remote_dir
                );
                download::download_files(data_dir, &remote_url_prefix, local_data_path)
            };
            let stats = match download_result {
                Ok(stats) => stats,
                Err(e) if e.is_exceeded_limit() => {
                    // Another source holds the same data; it will not fit
                    // either.
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "failed to download snapshot from remote BE: address={} remote_dir={} error={}",
                        address, remote_dir, e
                    );
                    last_status = Some(e);
                    continue; // Try another BE
                }
            };
            self.copy_size = stats.copied_bytes as i64;
            self.copy_time_ms = stats.elapsed_ms as i64;

            // No need to try again with another BE.
            self.pending_rs_guards = convert_rowset_ids(
                self.engine.rowset_id_generator(),
                local_data_path,
                &ConvertTarget {
                    tablet_id: self.clone_req.tablet_id,
                    replica_id: self.clone_req.replica_id,
                    table_id: self.clone_req.table_id,
                    partition_id: self.clone_req.partition_id,
                    schema_hash: self.clone_req.schema_hash,
                },
            )?;
            return Ok(allow_incremental_clone);
        }

        Err(last_status.unwrap_or_else(|| {
            StorageError::PeerUnavailable("no candidate source backends".to_string())
        }))
    }

    /// Links downloaded files into the tablet dir and merges the cloned
    /// header into local metadata under the full lock set. The staging dir is
    /// removed on every exit; linked files are removed again on failure.
    fn finish_clone(
        &self,
        tablet: &Arc<Tablet>,
        clone_dir: &Path,
        version: i64,
        is_incremental_clone: bool,
    ) -> Result<()> {
        let _remove_clone_dir = guard(clone_dir.to_path_buf(), |dir| {
            if let Err(e) = remove_dir_all_if_exists(&dir) {
                warn!("failed to remove {}: {}", dir.display(), e);
            }
        });

        if !clone_dir.exists() {
            return Err(StorageError::internal(format!(
                "clone dir not existed. clone_dir={}",
                clone_dir.display()
            )));
        }

        // The tablet meta arrived as a .hdr file; parse it and drop the file.
        let cloned_header_path = header_file_path(clone_dir, tablet.tablet_id());
        if !cloned_header_path.exists() {
            return Err(StorageError::InconsistentSnapshot(format!(
                "tablet header missing from snapshot: {}",
                cloned_header_path.display()
            )));
        }
        let cloned_tablet_meta = TabletMeta::load_from_file(&cloned_header_path)?;
        fs::remove_file(&cloned_header_path)?;

        let binlog_metas_file = clone_dir.join(BINLOG_METAS_FILE_NAME);
        let mut contain_binlog = false;
        let mut rowset_binlog_metas = RowsetBinlogMetasPb::default();
        if binlog_metas_file.exists() {
            if fs::metadata(&binlog_metas_file)?.len() > 0 {
                contain_binlog = true;
                rowset_binlog_metas = read_message(&binlog_metas_file)?;
            }
            fs::remove_file(&binlog_metas_file)?;
        }
        let tablet_dir = tablet.tablet_path().to_path_buf();
        if contain_binlog {
            fs::create_dir_all(tablet_dir.join(BINLOG_DIR_NAME))?;
        }

        let clone_file_names = list_file_names(clone_dir)?;
        let local_file_names = list_file_names(&tablet_dir)?;

        let mut linked_success_files: Vec<PathBuf> = Vec::new();
        let merge_result = self.link_and_merge(
            tablet,
            clone_dir,
            &tablet_dir,
            &clone_file_names,
            &local_file_names,
            contain_binlog,
            &rowset_binlog_metas,
            &cloned_tablet_meta,
            version,
            is_incremental_clone,
            &mut linked_success_files,
        );

        match merge_result {
            Ok(()) => {
                if !is_incremental_clone {
                    // Cumulative compaction restarts from scratch after the
                    // rowset set was replaced wholesale.
                    tablet.set_cumulative_layer_point(K_INVALID_CUMULATIVE_POINT);
                }
                Ok(())
            }
            Err(e) => {
                for linked in &linked_success_files {
                    if let Err(unlink_err) = util::remove_file_if_exists(linked) {
                        warn!(
                            "failed to unlink {} while cleaning up: {}",
                            linked.display(),
                            unlink_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn link_and_merge(
        &self,
        tablet: &Arc<Tablet>,
        clone_dir: &Path,
        tablet_dir: &Path,
        clone_file_names: &std::collections::HashSet<String>,
        local_file_names: &std::collections::HashSet<String>,
        contain_binlog: bool,
        rowset_binlog_metas: &RowsetBinlogMetasPb,
        cloned_tablet_meta: &TabletMeta,
        version: i64,
        is_incremental_clone: bool,
        linked_success_files: &mut Vec<PathBuf>,
    ) -> Result<()> {
        // Link every staged file not already present locally; remember each
        // link so a later failure can undo it.
        for clone_file in clone_file_names {
            if local_file_names.contains(clone_file) {
                debug!(
                    "find same file when clone, skip it. tablet={} clone_file={}",
                    tablet.tablet_id(),
                    clone_file
                );
                continue;
            }

            let mut skip_link_file = false;
            let to: PathBuf;
            if clone_file.ends_with(BINLOG_FILE_SUFFIX)
                || clone_file.ends_with(BINLOG_INDEX_FILE_SUFFIX)
            {
                if !contain_binlog {
                    warn!(
                        "clone binlog file, but not contain binlog metas. tablet={} clone_file={}",
                        tablet.tablet_id(),
                        clone_file
                    );
                    break;
                }
                let target = check_dest_binlog_valid(tablet_dir, clone_dir, clone_file)?;
                skip_link_file = target.skip_link;
                to = target.dest;
            } else {
                to = tablet_dir.join(clone_file);
            }

            if !skip_link_file {
                fs::hard_link(clone_dir.join(clone_file), &to)?;
                linked_success_files.push(to);
            }
        }
        if contain_binlog {
            tablet.ingest_binlog_metas(rowset_binlog_metas)?;
        }

        // Clone and compaction must be performed sequentially; hold the full
        // lock set for the whole metadata merge.
        let mut locks = tablet.take_merge_locks();
        if is_incremental_clone {
            self.finish_incremental_clone(tablet, &mut locks.meta, cloned_tablet_meta, version)
        } else {
            self.finish_full_clone(tablet, &mut locks.meta, cloned_tablet_meta)
        }
    }

    /// Adds the cloned rowsets for versions still missing locally. Missing
    /// versions are recomputed here, under the lock: versions published since
    /// the outside computation must not be clobbered.
    fn finish_incremental_clone(
        &self,
        tablet: &Arc<Tablet>,
        meta: &mut TabletMeta,
        cloned_tablet_meta: &TabletMeta,
        version: i64,
    ) -> Result<()> {
        info!(
            "begin to finish incremental clone. tablet={}, visible_version={}, cloned_tablet_replica_id={}",
            tablet.tablet_id(),
            version,
            cloned_tablet_meta.replica_id
        );

        let missed_versions = meta.calc_missed_versions(version);
        debug!(
            "get missed versions again when finish incremental clone. tablet={}, clone version={}, missed_versions_size={}",
            tablet.tablet_id(),
            version,
            missed_versions.len()
        );

        let mut rowsets_to_clone = Vec::with_capacity(missed_versions.len());
        for missed_version in missed_versions {
            let rs_meta = cloned_tablet_meta
                .acquire_rs_meta_by_version(missed_version)
                .ok_or_else(|| {
                    StorageError::internal(format!(
                        "missed version {} is not found in cloned tablet meta",
                        missed_version
                    ))
                })?;
            rowsets_to_clone.push(tablet.create_rowset(rs_meta)?);
        }

        // For incremental clone nothing is deleted.
        tablet.revise_tablet_meta(meta, rowsets_to_clone, Vec::new(), true)
    }

    /// Replaces every local rowset at or below the cloned max version with
    /// the cloned rowsets; strictly newer local rowsets survive.
    fn finish_full_clone(
        &self,
        tablet: &Arc<Tablet>,
        meta: &mut TabletMeta,
        cloned_tablet_meta: &TabletMeta,
    ) -> Result<()> {
        let Some(cloned_max_version) = cloned_tablet_meta.max_version() else {
            return Err(StorageError::InconsistentSnapshot(
                "cloned tablet meta has no rowsets".to_string(),
            ));
        };
        info!(
            "begin to finish full clone. tablet={}, cloned_max_version={}",
            tablet.tablet_id(),
            cloned_max_version
        );

        // Compare the versions of the local tablet and the cloned tablet.
        // For example, at clone version 8:
        //
        //      local tablet: [0-1]x [2-5]x [6-6]x [7-7]x [9-10]
        //      clone tablet: [0-1]  [2-4]  [5-6]  [7-8]
        //
        // the local rowsets marked with "x" are replaced.
        let mut to_delete = Vec::new();
        for local_version in meta.rowset_versions() {
            if local_version.start <= cloned_max_version.end
                && local_version.end > cloned_max_version.end
            {
                // A local range straddling the cloned max version cannot be
                // filled from the cloned data.
                return Err(StorageError::VersionCrossLatest {
                    cloned_max: cloned_max_version.end,
                    local: local_version,
                });
            }
            if local_version.end <= cloned_max_version.end {
                let rs_meta = meta
                    .acquire_rs_meta_by_version(local_version)
                    .cloned()
                    .ok_or_else(|| {
                        StorageError::internal(format!(
                            "rowset meta for version {} disappeared during merge",
                            local_version
                        ))
                    })?;
                to_delete.push(Rowset::new(rs_meta));
            }
            // Anything strictly newer than the clone point stays; cooldowned
            // rowsets are continuous, so rowsets past the clone point are
            // local.
        }

        let mut to_add = Vec::with_capacity(cloned_tablet_meta.rowset_count());
        for rs_meta in cloned_tablet_meta.all_rs_metas() {
            to_add.push(tablet.create_rowset(rs_meta)?);
        }

        {
            let cooldown_conf = tablet.cooldown_conf();
            if cooldown_conf.cooldown_replica_id == meta.replica_id {
                // A full clone of the cooldown replica itself must not adopt
                // a cooldown meta id minted in an older term.
                meta.cooldown_meta_id = Some(UniqueId::gen_uid());
            } else {
                meta.cooldown_meta_id = cloned_tablet_meta.cooldown_meta_id;
            }
        }
        if meta.enable_unique_key_merge_on_write {
            meta.delete_bitmap.merge(&cloned_tablet_meta.delete_bitmap);
        }
        tablet.revise_tablet_meta(meta, to_add, to_delete, false)
    }
}
