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
//! Clone scenarios with batch download enabled (process-wide config), driving
//! the grouped-fetch strategy against the real download service.


use silica::common::ids::RowsetId;
use silica::storage::rowset::{segment_data_file_name, segment_index_file_name};

use crate::common::{
    FakeSnapshotRpc, SourceTablet, TestEnv, TestPeer, clone_request, create_local_tablet,
    run_clone, segment_payload, source_meta,
};

mod common;

const TABLET_ID: i64 = 20001;
const SCHEMA_HASH: i32 = 54321;

fn init() {
    common::init_test_config("enable_batch_download = true");
}

#[test]
fn new_tablet_clone_uses_batch_download() {
    init();
    let env = TestEnv::new();
    let rpc = FakeSnapshotRpc::new();
    let peer = TestPeer::start(9001);
    rpc.register(&peer);

    peer.state.serve_tablet(SourceTablet::full(source_meta(
        TABLET_ID,
        SCHEMA_HASH,
        2,
        &[(0, 1), (2, 4), (5, 7)],
        300,
    )));

    let request = clone_request(TABLET_ID, SCHEMA_HASH, 3, 7, vec![peer.backend_addr()]);
    let (result, infos) = run_clone(&env.engine, rpc, request);
    result.expect("batch clone succeeds");

    let tablet = env
        .engine
        .tablet_manager()
        .get_tablet(TABLET_ID)
        .expect("tablet registered");
    assert_eq!(infos[0].version, 7);
    assert_eq!(tablet.replica_id(), 3);

    let meta = tablet.visible_meta();
    assert_eq!(meta.rowset_count(), 3);
    for rs in meta.all_rs_metas() {
        let id = RowsetId::new(rs.rowset_id);
        let data_path = tablet.tablet_path().join(segment_data_file_name(id, 0));
        assert!(data_path.is_file());
        assert!(
            tablet
                .tablet_path()
                .join(segment_index_file_name(id, 0))
                .is_file()
        );
    }
    // Batch frames delivered the exact payload bytes.
    let first = meta
        .acquire_rs_meta_by_version(silica::common::ids::Version::new(0, 1))
        .expect("rowset [0-1]");
    let copied = std::fs::read(
        tablet
            .tablet_path()
            .join(segment_data_file_name(RowsetId::new(first.rowset_id), 0)),
    )
    .expect("read segment");
    // Identity rewrite renamed the file but kept the source payload.
    assert_eq!(copied, segment_payload(300, 0));
}

#[test]
fn incremental_clone_over_batch_download() {
    init();
    let env = TestEnv::new();
    let rpc = FakeSnapshotRpc::new();
    let peer = TestPeer::start(9002);
    rpc.register(&peer);

    let tablet = create_local_tablet(
        &env.engine,
        TABLET_ID + 1,
        SCHEMA_HASH,
        3,
        &[(0, 1), (2, 4)],
        false,
    );
    peer.state.serve_tablet(SourceTablet::incremental(source_meta(
        TABLET_ID + 1,
        SCHEMA_HASH,
        2,
        &[(0, 1), (2, 4), (5, 5), (6, 6)],
        300,
    )));

    let request = clone_request(
        TABLET_ID + 1,
        SCHEMA_HASH,
        3,
        6,
        vec![peer.backend_addr()],
    );
    let (result, infos) = run_clone(&env.engine, rpc, request);
    result.expect("batch incremental clone succeeds");

    assert_eq!(infos[0].version, 6);
    let got: Vec<(i64, i64)> = tablet
        .rowset_versions()
        .into_iter()
        .map(|v| (v.start, v.end))
        .collect();
    assert_eq!(got, vec![(0, 1), (2, 4), (5, 5), (6, 6)]);
}
