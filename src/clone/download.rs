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
//! Snapshot file transfer from a source backend.
//!
//! Two strategies share one contract: deliver every file from the remote
//! snapshot directory into the local staging directory, verifying sizes and
//! placing the `.hdr` file last. The header's presence is the completeness
//! barrier for downstream loaders, so nothing may reorder it forward.
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use url::Url;

use crate::common::config;
use crate::common::status::{Result, StorageError};
use crate::common::util::{mask_token, remove_dir_all_if_exists};
use crate::silica_logging::{info, warn};
use crate::storage::data_dir::DataDir;
use crate::storage::metadata::HEADER_FILE_SUFFIX;

pub const HTTP_REQUEST_PREFIX: &str = "/api/_tablet/_download";
pub const BATCH_DOWNLOAD_PREFIX: &str = "/api/_tablet/_batch_download";

const BATCH_FILE_SIZE: u64 = 64 << 20;
const BATCH_FILE_NUM: usize = 64;

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default)]
pub struct DownloadStats {
    pub copied_bytes: u64,
    pub elapsed_ms: u64,
}

fn execute_with_retry<T>(max_retry: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut last_err = None;
    for attempt in 0..max_retry.max(1) {
        if attempt > 0 {
            std::thread::sleep(RETRY_BACKOFF);
        }
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("http operation failed (attempt {}): {}", attempt + 1, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt"))
}

fn http_client() -> Result<Client> {
    Client::builder()
        .build()
        .map_err(|e| StorageError::TransferFailed(format!("build http client: {}", e)))
}

/// Moves the `.hdr` entry to the end so it transfers last.
fn promote_header_last<T>(entries: &mut [T], name_of: impl Fn(&T) -> &str) {
    let len = entries.len();
    for i in 0..len.saturating_sub(1) {
        if name_of(&entries[i]).ends_with(HEADER_FILE_SUFFIX) {
            entries.swap(i, len - 1);
            break;
        }
    }
}

fn reset_local_dir(local_dir: &Path) -> Result<()> {
    // A stale staging dir may hold same-named files from another source with
    // different versions; start from scratch every time.
    remove_dir_all_if_exists(local_dir)?;
    fs::create_dir_all(local_dir)?;
    Ok(())
}

fn set_owner_rw(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

fn estimate_timeout_s(bytes: u64) -> u64 {
    let estimate = bytes / config::download_low_speed_limit_kbps() / 1024;
    estimate.max(config::download_low_speed_time())
}

fn fetch_text(client: &Client, url: &str, timeout: Duration) -> Result<String> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url), e)))?;
    if !response.status().is_success() {
        return Err(StorageError::TransferFailed(format!(
            "{}: http status {}",
            mask_token(url),
            response.status()
        )));
    }
    response
        .text()
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url), e)))
}

/// Per-file strategy: list names, HEAD each for size, then GET with an
/// adaptive timeout, verifying the written length.
pub fn download_files(
    data_dir: &DataDir,
    remote_url_prefix: &str,
    local_path: &Path,
) -> Result<DownloadStats> {
    reset_local_dir(local_path)?;
    let client = http_client()?;
    let max_retry = config::download_file_max_retry();

    let list_timeout = Duration::from_secs(config::list_remote_file_timeout_s());
    let file_list_str = execute_with_retry(max_retry, || {
        fetch_text(&client, remote_url_prefix, list_timeout)
    })?;
    let mut file_name_list: Vec<String> = file_list_str
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    promote_header_last(&mut file_name_list, |name| name.as_str());

    let mut total_file_size = 0u64;
    let watch = Instant::now();
    for file_name in &file_name_list {
        let remote_file_url = format!("{}{}", remote_url_prefix, file_name);

        let head_timeout = Duration::from_secs(config::get_length_timeout_s());
        let file_size = execute_with_retry(max_retry, || {
            head_content_length(&client, &remote_file_url, head_timeout)
        })?;

        if data_dir.reach_capacity_limit(file_size) {
            return Err(StorageError::ExceededLimit {
                path: data_dir.path().display().to_string(),
                bytes: file_size,
            });
        }

        total_file_size += file_size;
        let estimate_timeout = estimate_timeout_s(file_size);
        let local_file_path = local_path.join(file_name);
        info!(
            "clone begin to download file from: {} to: {}. size(B): {}, timeout(s): {}",
            mask_token(&remote_file_url),
            local_file_path.display(),
            file_size,
            estimate_timeout
        );

        execute_with_retry(max_retry, || {
            download_one_file(
                &client,
                &remote_file_url,
                &local_file_path,
                file_size,
                Duration::from_secs(estimate_timeout),
            )
        })?;
    }

    let total_time_ms = watch.elapsed().as_millis() as u64;
    log_copy_rate(file_name_list.len(), total_file_size, total_time_ms);
    Ok(DownloadStats {
        copied_bytes: total_file_size,
        elapsed_ms: total_time_ms,
    })
}

fn head_content_length(client: &Client, url: &str, timeout: Duration) -> Result<u64> {
    let response = client
        .head(url)
        .timeout(timeout)
        .send()
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url), e)))?;
    if !response.status().is_success() {
        return Err(StorageError::TransferFailed(format!(
            "{}: http status {}",
            mask_token(url),
            response.status()
        )));
    }
    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| {
            StorageError::TransferFailed(format!("{}: missing content length", mask_token(url)))
        })
}

fn download_one_file(
    client: &Client,
    url: &str,
    local_file_path: &Path,
    expected_size: u64,
    timeout: Duration,
) -> Result<()> {
    let mut response = client
        .get(url)
        .timeout(timeout)
        .send()
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url), e)))?;
    if !response.status().is_success() {
        return Err(StorageError::TransferFailed(format!(
            "{}: http status {}",
            mask_token(url),
            response.status()
        )));
    }
    let mut file = fs::File::create(local_file_path)?;
    response
        .copy_to(&mut file)
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url), e)))?;
    drop(file);

    let local_file_size = fs::metadata(local_file_path)?.len();
    if local_file_size != expected_size {
        warn!(
            "download file length error, remote_path={}, file_size={}, local_file_size={}",
            mask_token(url),
            expected_size,
            local_file_size
        );
        return Err(StorageError::TransferFailed(
            "downloaded file size is not equal".to_string(),
        ));
    }
    set_owner_rw(local_file_path)
}

/// Probes whether the source exposes the batch endpoint.
pub fn is_support_batch_download(address: &str, token: &str) -> bool {
    let Ok(client) = http_client() else {
        return false;
    };
    let Ok(mut url) = Url::parse(&format!("http://{}{}", address, BATCH_DOWNLOAD_PREFIX)) else {
        return false;
    };
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("check", "true");
    let timeout = Duration::from_secs(config::get_length_timeout_s());
    match client.get(url.as_str()).timeout(timeout).send() {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Contiguous batch ranges bounded by file count and byte budget; the final
/// file (the `.hdr`) only shares a batch when it is the sole file.
fn pack_batches(files: &[(String, u64)]) -> Vec<std::ops::Range<usize>> {
    let total = files.len();
    let mut batches = Vec::new();
    let mut i = 0;
    while i < total {
        let mut count = 0usize;
        let mut batch_bytes = 0u64;
        for j in i..total {
            if count >= BATCH_FILE_NUM
                || batch_bytes >= BATCH_FILE_SIZE
                || (j + 1 == total && count > 0)
            {
                break;
            }
            count += 1;
            batch_bytes += files[j].1;
        }
        batches.push(i..i + count);
        i += count;
    }
    batches
}

/// Batch strategy: one manifest request, then grouped fetches.
pub fn batch_download_files(
    data_dir: &DataDir,
    address: &str,
    token: &str,
    remote_dir: &str,
    local_dir: &Path,
) -> Result<DownloadStats> {
    reset_local_dir(local_dir)?;
    let client = http_client()?;
    let max_retry = config::download_file_max_retry();

    let mut file_info_list = execute_with_retry(max_retry, || {
        list_remote_files_v2(&client, address, token, remote_dir)
    })?;
    promote_header_last(&mut file_info_list, |(name, _)| name.as_str());

    let watch = Instant::now();
    let mut total_file_size = 0u64;
    for range in pack_batches(&file_info_list) {
        let batch = &file_info_list[range];
        let batch_bytes: u64 = batch.iter().map(|(_, size)| *size).sum();

        if data_dir.reach_capacity_limit(batch_bytes) {
            return Err(StorageError::ExceededLimit {
                path: data_dir.path().display().to_string(),
                bytes: batch_bytes,
            });
        }

        execute_with_retry(max_retry, || {
            fetch_batch(&client, address, token, remote_dir, batch, local_dir)
        })?;
        total_file_size += batch_bytes;
    }

    let total_time_ms = watch.elapsed().as_millis() as u64;
    log_copy_rate(file_info_list.len(), total_file_size, total_time_ms);
    Ok(DownloadStats {
        copied_bytes: total_file_size,
        elapsed_ms: total_time_ms,
    })
}

fn batch_url(address: &str, token: &str, remote_dir: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("http://{}{}", address, BATCH_DOWNLOAD_PREFIX))
        .map_err(|e| StorageError::TransferFailed(format!("invalid address {}: {}", address, e)))?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("dir", remote_dir);
    Ok(url)
}

/// Lists `(name, size)` pairs, one `name\tsize` line per file.
fn list_remote_files_v2(
    client: &Client,
    address: &str,
    token: &str,
    remote_dir: &str,
) -> Result<Vec<(String, u64)>> {
    let mut url = batch_url(address, token, remote_dir)?;
    url.query_pairs_mut().append_pair("list", "true");
    let timeout = Duration::from_secs(config::list_remote_file_timeout_s());
    let response = client
        .post(url.as_str())
        .timeout(timeout)
        .send()
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url.as_str()), e)))?;
    if !response.status().is_success() {
        return Err(StorageError::TransferFailed(format!(
            "{}: http status {}",
            mask_token(url.as_str()),
            response.status()
        )));
    }
    let body = response
        .text()
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url.as_str()), e)))?;

    let mut files = Vec::new();
    for line in body.lines().filter(|line| !line.trim().is_empty()) {
        let (name, size) = line.split_once('\t').ok_or_else(|| {
            StorageError::TransferFailed(format!("malformed list entry: {}", line))
        })?;
        let size = size.trim().parse::<u64>().map_err(|e| {
            StorageError::TransferFailed(format!("malformed file size in '{}': {}", line, e))
        })?;
        files.push((name.to_string(), size));
    }
    Ok(files)
}

/// Fetches one batch atomically: request body is the newline-joined name
/// list, the response interleaves `name\tsize\n` headers with raw bytes.
fn fetch_batch(
    client: &Client,
    address: &str,
    token: &str,
    remote_dir: &str,
    batch: &[(String, u64)],
    local_dir: &Path,
) -> Result<()> {
    let url = batch_url(address, token, remote_dir)?;
    let batch_bytes: u64 = batch.iter().map(|(_, size)| *size).sum();
    let timeout = Duration::from_secs(estimate_timeout_s(batch_bytes));
    let names = batch
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let response = client
        .post(url.as_str())
        .timeout(timeout)
        .body(names)
        .send()
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url.as_str()), e)))?;
    if !response.status().is_success() {
        return Err(StorageError::TransferFailed(format!(
            "{}: http status {}",
            mask_token(url.as_str()),
            response.status()
        )));
    }
    let body = response
        .bytes()
        .map_err(|e| StorageError::TransferFailed(format!("{}: {}", mask_token(url.as_str()), e)))?;

    let mut offset = 0usize;
    let mut delivered = 0usize;
    while offset < body.len() {
        let header_end = body[offset..]
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| {
                StorageError::TransferFailed("truncated batch frame header".to_string())
            })?;
        let header = std::str::from_utf8(&body[offset..offset + header_end]).map_err(|e| {
            StorageError::TransferFailed(format!("malformed batch frame header: {}", e))
        })?;
        offset += header_end + 1;

        let (name, size) = header.split_once('\t').ok_or_else(|| {
            StorageError::TransferFailed(format!("malformed batch frame header: {}", header))
        })?;
        let size = size.trim().parse::<usize>().map_err(|e| {
            StorageError::TransferFailed(format!("malformed batch frame size '{}': {}", header, e))
        })?;
        if offset + size > body.len() {
            return Err(StorageError::TransferFailed(format!(
                "truncated batch frame body for {}",
                name
            )));
        }

        let local_file_path = local_dir.join(name);
        fs::write(&local_file_path, &body[offset..offset + size])?;
        set_owner_rw(&local_file_path)?;
        offset += size;
        delivered += 1;
    }
    if delivered != batch.len() {
        return Err(StorageError::TransferFailed(format!(
            "batch response delivered {} of {} files",
            delivered,
            batch.len()
        )));
    }
    Ok(())
}

fn log_copy_rate(total_files: usize, total_file_size: u64, total_time_ms: u64) {
    let copy_rate = if total_time_ms > 0 {
        total_file_size as f64 / total_time_ms as f64 / 1000.0
    } else {
        0.0
    };
    info!(
        "succeed to copy tablet files, total files: {}, total file size: {} B, cost: {} ms, rate: {:.3} MB/s",
        total_files, total_file_size, total_time_ms, copy_rate
    );
}
