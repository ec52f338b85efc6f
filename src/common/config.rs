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
use crate::silica_config::config as silica_app_config;

pub(crate) fn enable_batch_download() -> bool {
    silica_app_config()
        .ok()
        .map(|c| c.clone.enable_batch_download)
        .unwrap_or(false)
}

pub(crate) fn download_low_speed_limit_kbps() -> u64 {
    silica_app_config()
        .ok()
        .map(|c| c.clone.download_low_speed_limit_kbps)
        .unwrap_or(50)
        .max(1)
}

pub(crate) fn download_low_speed_time() -> u64 {
    silica_app_config()
        .ok()
        .map(|c| c.clone.download_low_speed_time)
        .unwrap_or(300)
}

pub(crate) fn download_file_max_retry() -> u32 {
    silica_app_config()
        .ok()
        .map(|c| c.clone.download_file_max_retry)
        .unwrap_or(3)
        .max(1)
}

pub(crate) fn list_remote_file_timeout_s() -> u64 {
    silica_app_config()
        .ok()
        .map(|c| c.clone.list_remote_file_timeout_s)
        .unwrap_or(15)
}

pub(crate) fn get_length_timeout_s() -> u64 {
    silica_app_config()
        .ok()
        .map(|c| c.clone.get_length_timeout_s)
        .unwrap_or(10)
}

pub(crate) fn clone_worker_count() -> usize {
    silica_app_config()
        .ok()
        .map(|c| c.clone.clone_worker_count)
        .unwrap_or(3)
        .max(1)
}

pub(crate) fn flood_stage_usage_percent() -> u32 {
    silica_app_config()
        .ok()
        .map(|c| c.storage.flood_stage_usage_percent)
        .unwrap_or(90)
}

pub(crate) fn flood_stage_left_capacity_bytes() -> u64 {
    silica_app_config()
        .ok()
        .map(|c| c.storage.flood_stage_left_capacity_bytes)
        .unwrap_or(1 << 30)
}

pub(crate) fn enable_debug_points() -> bool {
    silica_app_config()
        .ok()
        .map(|c| c.debug.enable_debug_points)
        .unwrap_or(false)
}
