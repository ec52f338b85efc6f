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
//! Named debug injection points.
//!
//! A point is consulted only when `debug.enable_debug_points` is set in the
//! config, so production builds pay one branch per site.
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::common::config;

#[derive(Clone, Debug, Default)]
pub struct DebugPoint {
    params: HashMap<String, String>,
}

impl DebugPoint {
    pub fn param_i64(&self, name: &str, default: i64) -> i64 {
        self.params
            .get(name)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

fn registry() -> &'static Mutex<HashMap<String, DebugPoint>> {
    static POINTS: OnceLock<Mutex<HashMap<String, DebugPoint>>> = OnceLock::new();
    POINTS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn enable(name: &str, params: HashMap<String, String>) {
    registry()
        .lock()
        .expect("debug point registry lock")
        .insert(name.to_string(), DebugPoint { params });
}

pub fn disable(name: &str) {
    registry()
        .lock()
        .expect("debug point registry lock")
        .remove(name);
}

/// Returns the active point, or `None` when the point is not enabled or
/// debug points are switched off entirely.
pub fn lookup(name: &str) -> Option<DebugPoint> {
    if !config::enable_debug_points() {
        return None;
    }
    registry()
        .lock()
        .expect("debug point registry lock")
        .get(name)
        .cloned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::DebugPoint;

    #[test]
    fn params_parse_with_defaults() {
        let mut params = HashMap::new();
        params.insert("duration".to_string(), "250".to_string());
        let point = DebugPoint { params };
        assert_eq!(point.param_i64("duration", 10_000), 250);
        assert_eq!(point.param_i64("missing", 7), 7);
        assert_eq!(point.param_str("missing"), None);
    }
}
