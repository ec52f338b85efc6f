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
//! Snapshot file endpoints served to cloning peers.
//!
//! Single-file: `GET/HEAD <prefix>?token=T&file=<path>` lists a directory
//! (newline-separated names) or serves one file. Batch: a capability probe,
//! a `(name, size)` manifest, and a grouped fetch whose response interleaves
//! `name\tsize\n` headers with raw file bytes.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;

use crate::clone::download::{BATCH_DOWNLOAD_PREFIX, HTTP_REQUEST_PREFIX};
use crate::common::debug_points;
use crate::common::status::{Result, StorageError};
use crate::silica_logging::{error, info, warn};

#[derive(Clone)]
struct DownloadServiceState {
    token: String,
}

#[derive(Deserialize)]
struct DownloadParams {
    token: String,
    file: String,
}

#[derive(Deserialize)]
struct BatchParams {
    token: String,
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    list: Option<String>,
    #[serde(default)]
    check: Option<String>,
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "invalid token").into_response()
}

fn sorted_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

async fn handle_download(
    State(state): State<DownloadServiceState>,
    method: Method,
    Query(params): Query<DownloadParams>,
) -> Response {
    if params.token != state.token {
        return forbidden();
    }
    let path = PathBuf::from(&params.file);
    if path.is_dir() {
        return match sorted_file_names(&path) {
            Ok(names) => (StatusCode::OK, names.join("\n")).into_response(),
            Err(e) => {
                warn!("list {} failed: {}", path.display(), e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        };
    }
    if !path.is_file() {
        return (StatusCode::NOT_FOUND, "no such file").into_response();
    }

    if method == Method::HEAD {
        let len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        };
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, len)
            .body(Body::empty())
            .expect("build head response");
    }

    match std::fs::read(&path) {
        Ok(mut bytes) => {
            if let Some(point) = debug_points::lookup("DownloadService.truncate_download") {
                let applies = point
                    .param_str("path_contains")
                    .map(|fragment| params.file.contains(fragment))
                    .unwrap_or(true);
                if applies {
                    let drop_bytes = point.param_i64("bytes", 1).max(0) as usize;
                    bytes.truncate(bytes.len().saturating_sub(drop_bytes));
                }
            }
            (StatusCode::OK, bytes).into_response()
        }
        Err(e) => {
            warn!("read {} failed: {}", path.display(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn handle_batch_probe(
    State(state): State<DownloadServiceState>,
    Query(params): Query<BatchParams>,
) -> Response {
    if params.token != state.token {
        return forbidden();
    }
    if params.check.as_deref() == Some("true") {
        return (StatusCode::OK, "OK").into_response();
    }
    (StatusCode::BAD_REQUEST, "missing check parameter").into_response()
}

async fn handle_batch(
    State(state): State<DownloadServiceState>,
    Query(params): Query<BatchParams>,
    body: String,
) -> Response {
    if params.token != state.token {
        return forbidden();
    }
    let Some(dir) = params.dir.as_deref() else {
        return (StatusCode::BAD_REQUEST, "missing dir parameter").into_response();
    };
    let dir = PathBuf::from(dir);

    if params.list.as_deref() == Some("true") {
        return match list_with_sizes(&dir) {
            Ok(lines) => (StatusCode::OK, lines).into_response(),
            Err(e) => {
                warn!("batch list {} failed: {}", dir.display(), e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        };
    }

    match build_batch_body(&dir, &body) {
        Ok(frames) => (StatusCode::OK, frames).into_response(),
        Err(BatchBodyError::NotFound(name)) => {
            (StatusCode::NOT_FOUND, format!("no such file: {}", name)).into_response()
        }
        Err(BatchBodyError::Io(e)) => {
            warn!("batch fetch from {} failed: {}", dir.display(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn list_with_sizes(dir: &Path) -> std::io::Result<String> {
    let mut lines = String::new();
    for name in sorted_file_names(dir)? {
        let len = std::fs::metadata(dir.join(&name))?.len();
        lines.push_str(&format!("{}\t{}\n", name, len));
    }
    Ok(lines)
}

#[derive(Debug)]
enum BatchBodyError {
    NotFound(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for BatchBodyError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

fn build_batch_body(dir: &Path, names: &str) -> std::result::Result<Vec<u8>, BatchBodyError> {
    let mut out = Vec::new();
    for name in names.lines().filter(|line| !line.trim().is_empty()) {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(BatchBodyError::NotFound(name.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        out.extend_from_slice(format!("{}\t{}\n", name, bytes.len()).as_bytes());
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

fn router(token: String) -> Router {
    Router::new()
        .route(HTTP_REQUEST_PREFIX, get(handle_download))
        .route(
            BATCH_DOWNLOAD_PREFIX,
            get(handle_batch_probe).post(handle_batch),
        )
        .with_state(DownloadServiceState { token })
}

/// Running download service; shuts down when dropped.
pub struct DownloadServiceHandle {
    addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl DownloadServiceHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for DownloadServiceHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Binds and serves the download endpoints on a dedicated runtime thread.
/// Pass port 0 to bind an ephemeral port; the handle reports the real one.
pub fn start_download_service(bind: SocketAddr, token: String) -> Result<DownloadServiceHandle> {
    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let join = std::thread::Builder::new()
        .name("download service".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = addr_tx.send(Err(e));
                    return;
                }
            };
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::bind(bind).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        let _ = addr_tx.send(Err(e));
                        return;
                    }
                };
                let addr = match listener.local_addr() {
                    Ok(addr) => addr,
                    Err(e) => {
                        let _ = addr_tx.send(Err(e));
                        return;
                    }
                };
                let _ = addr_tx.send(Ok(addr));
                info!("download service listening on {}", addr);

                let serve = axum::serve(listener, router(token)).with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                });
                if let Err(e) = serve.await {
                    error!("download service stopped: {}", e);
                }
            });
        })?;

    let addr = addr_rx
        .recv()
        .map_err(|_| StorageError::internal("download service thread exited before binding"))?
        .map_err(StorageError::Io)?;
    Ok(DownloadServiceHandle {
        addr,
        shutdown: Some(shutdown_tx),
        join: Some(join),
    })
}
