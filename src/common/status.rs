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
use thiserror::Error;

use crate::common::ids::Version;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Error kinds surfaced by the storage engine and the clone core.
///
/// The clone coordinator branches on these kinds: per-peer failures are
/// absorbed at the peer-loop boundary, capacity and consistency failures
/// propagate immediately.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transition already registered on tablet {tablet_id}: {job}")]
    TransitionBusy { tablet_id: i64, job: String },

    #[error("try lock failed: {0}")]
    TryLockFailed(String),

    #[error("reach the capacity limit of path {path}, file_size={bytes}")]
    ExceededLimit { path: String, bytes: u64 },

    #[error("source backend unavailable: {0}")]
    PeerUnavailable(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("inconsistent snapshot: {0}")]
    InconsistentSnapshot(String),

    #[error("version cross src latest. cloned_max_version={cloned_max}, local_version={local}")]
    VersionCrossLatest { cloned_max: i64, local: Version },

    #[error("unexpected version. tablet version: {actual}, expected version: {expected}")]
    UnexpectedVersion { actual: i64, expected: i64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    pub fn is_exceeded_limit(&self) -> bool {
        matches!(self, Self::ExceededLimit { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::StorageError;
    use crate::common::ids::Version;

    #[test]
    fn error_messages_carry_context() {
        let err = StorageError::VersionCrossLatest {
            cloned_max: 13,
            local: Version::new(2, 14),
        };
        assert_eq!(
            err.to_string(),
            "version cross src latest. cloned_max_version=13, local_version=[2-14]"
        );
    }

    #[test]
    fn exceeded_limit_is_detectable() {
        let err = StorageError::ExceededLimit {
            path: "/data".to_string(),
            bytes: 42,
        };
        assert!(err.is_exceeded_limit());
        assert!(!StorageError::internal("x").is_exceeded_limit());
    }
}
