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
//! Reconciliation of shipped binlog files with the local binlog directory.
use std::path::{Path, PathBuf};

use crate::common::status::{Result, StorageError};
use crate::common::util::md5sum;
use crate::silica_logging::warn;
use crate::storage::metadata::BINLOG_DIR_NAME;

pub(crate) const BINLOG_FILE_SUFFIX: &str = ".binlog";
pub(crate) const BINLOG_INDEX_FILE_SUFFIX: &str = ".binlog-index";

#[derive(Debug)]
pub(crate) struct BinlogLinkTarget {
    pub dest: PathBuf,
    pub skip_link: bool,
}

/// Local name for a shipped binlog file: `.binlog` becomes `.dat`,
/// `.binlog-index` becomes `.idx`.
pub(crate) fn binlog_dest_file_name(clone_file: &str) -> String {
    if let Some(stem) = clone_file.strip_suffix(BINLOG_INDEX_FILE_SUFFIX) {
        format!("{}.idx", stem)
    } else if let Some(stem) = clone_file.strip_suffix(BINLOG_FILE_SUFFIX) {
        format!("{}.dat", stem)
    } else {
        clone_file.to_string()
    }
}

/// Resolves where a staged binlog file lands under `<tablet_dir>/_binlog/`.
///
/// An already-present destination with an identical MD5 is a re-clone and is
/// skipped; differing content means silent corruption or an identifier
/// collision and fails the clone.
pub(crate) fn check_dest_binlog_valid(
    tablet_dir: &Path,
    clone_dir: &Path,
    clone_file: &str,
) -> Result<BinlogLinkTarget> {
    let from = clone_dir.join(clone_file);
    let to = tablet_dir
        .join(BINLOG_DIR_NAME)
        .join(binlog_dest_file_name(clone_file));

    if !to.exists() {
        return Ok(BinlogLinkTarget {
            dest: to,
            skip_link: false,
        });
    }

    warn!(
        "binlog file already exist. tablet_dir={}, clone_file={}, to={}",
        tablet_dir.display(),
        from.display(),
        to.display()
    );

    let clone_file_md5sum = md5sum(&from)?;
    let to_file_md5sum = md5sum(&to)?;
    if clone_file_md5sum == to_file_md5sum {
        return Ok(BinlogLinkTarget {
            dest: to,
            skip_link: true,
        });
    }

    let err_msg = format!(
        "binlog file already exist, but md5sum not equal. tablet_dir={}, clone_file={}",
        tablet_dir.display(),
        clone_file
    );
    warn!("{}", err_msg);
    Err(StorageError::InconsistentSnapshot(err_msg))
}
