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
use std::fmt;
use std::str::FromStr;

pub type TabletId = i64;
pub type TableId = i64;
pub type PartitionId = i64;
pub type ReplicaId = i64;
pub type SchemaHash = i32;

/// Rowset id in silica's internal representation.
///
/// The numeric form is embedded into segment file names (`<rowset_id>_<ord>.dat`),
/// so the `Display` impl is part of the on-disk layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RowsetId(pub i64);

impl RowsetId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RowsetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}", self.0)
    }
}

impl From<i64> for RowsetId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for RowsetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = s
            .parse::<i64>()
            .map_err(|e| format!("invalid rowset id string '{}': {}", s, e))?;
        Ok(Self(v))
    }
}

/// Closed version range `[start, end]` covered by one rowset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Version {
    pub start: i64,
    pub end: i64,
}

impl Version {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub const fn singleton(v: i64) -> Self {
        Self { start: v, end: v }
    }

    pub fn contains(self, v: i64) -> bool {
        self.start <= v && v <= self.end
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.start, self.end)
    }
}

/// 128-bit identity for cooldown metadata terms.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct UniqueId {
    pub hi: i64,
    pub lo: i64,
}

impl UniqueId {
    pub fn gen_uid() -> Self {
        Self {
            hi: rand::random::<i64>(),
            lo: rand::random::<i64>(),
        }
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hi = self.hi as u64;
        let lo = self.lo as u64;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (hi >> 32) as u32,
            (hi >> 16) as u16,
            hi as u16,
            (lo >> 48) as u16,
            lo & 0x0000_FFFF_FFFF_FFFF
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{RowsetId, UniqueId, Version};

    #[test]
    fn rowset_id_display_is_zero_padded() {
        assert_eq!(RowsetId::new(42).to_string(), "00000000000000000042");
    }

    #[test]
    fn version_contains_is_closed_range() {
        let v = Version::new(2, 5);
        assert!(v.contains(2));
        assert!(v.contains(5));
        assert!(!v.contains(6));
        assert_eq!(v.to_string(), "[2-5]");
    }

    #[test]
    fn unique_id_display_uses_uuid_layout() {
        let id = UniqueId { hi: 0, lo: 1 };
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000001");
    }
}
