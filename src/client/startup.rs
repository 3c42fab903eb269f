//! Startup pass: decide which local files still need uploading before the
//! watcher takes over.
//!
//! With a diff API configured, the remote listing seeds the transfer table
//! so completed files are skipped and partial ones resume where the server
//! left off. Without one, every local file is simply queued and the server
//! sorts out offsets through the normal rewind path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::client::mapping::RemoteMapper;
use crate::client::pending::PendingSet;
use crate::client::state::TransferTable;
use crate::diff::{PathFileRequest, PathFileResponse, ENDPOINT};
use crate::protocol::timeouts;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub complete: usize,
    pub partial: usize,
    pub missing: usize,
}

impl SeedSummary {
    pub fn queued(&self) -> usize {
        self.partial + self.missing
    }
}

/// Every syncable regular file under the mapped roots, with its size.
pub fn scan_local(mapper: &RemoteMapper) -> Vec<(PathBuf, u64)> {
    let mut out = Vec::new();
    for root in mapper.local_roots() {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || mapper.remote_path(entry.path()).is_none() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            out.push((entry.into_path(), meta.len()));
        }
    }
    out
}

/// Queue every local file without any seeded state.
pub fn enqueue_all(mapper: &RemoteMapper, pending: &PendingSet) -> usize {
    let files = scan_local(mapper);
    let n = files.len();
    for (path, _) in files {
        pending.add(path);
    }
    n
}

/// Seed the table from a remote listing and queue what is not complete.
///
/// | remote copy        | seeded `(size, confirmed)` | queued |
/// |--------------------|----------------------------|--------|
/// | same size          | `(size, size)`             | no     |
/// | smaller            | `(size, remote size)`      | yes    |
/// | absent or larger   | `(size, 0)`                | yes    |
pub fn seed_from_listing(
    mapper: &RemoteMapper,
    listing: &PathFileResponse,
    table: &TransferTable,
    pending: &PendingSet,
) -> SeedSummary {
    let mut remote: HashMap<String, u64> = HashMap::new();
    for dir in &listing.pathfiles {
        let base = dir.path.trim_end_matches('/');
        for f in &dir.files {
            remote.insert(format!("{}/{}", base, f.filename), f.size);
        }
    }

    let mut summary = SeedSummary::default();
    for (path, size) in scan_local(mapper) {
        let Some(wire) = mapper.remote_path(&path) else {
            continue;
        };
        match remote.get(&wire).copied() {
            Some(rsize) if rsize == size => {
                table.seed(&path, size, size);
                summary.complete += 1;
            }
            Some(rsize) if rsize < size => {
                table.seed(&path, size, rsize);
                pending.add(path);
                summary.partial += 1;
            }
            _ => {
                table.seed(&path, size, 0);
                pending.add(path);
                summary.missing += 1;
            }
        }
    }
    summary
}

async fn query_listing(
    client: &reqwest::Client,
    url: &str,
    request: &PathFileRequest,
) -> Result<PathFileResponse> {
    let resp = client
        .post(url)
        .json(request)
        .send()
        .await
        .with_context(|| format!("POST {}", url))?;
    if !resp.status().is_success() {
        bail!("POST {} returned {}", url, resp.status());
    }
    let listing: PathFileResponse = resp.json().await.context("decode listing")?;
    if listing.result != 0 {
        bail!("listing query failed with result {}", listing.result);
    }
    Ok(listing)
}

/// Ask the server which files it already holds, retrying until it answers.
///
/// Returns `None` only when shutdown is requested first.
pub async fn fetch_listing(
    api_addr: &str,
    rpaths: Vec<String>,
    retry: Duration,
    shutdown: &CancellationToken,
) -> Result<Option<PathFileResponse>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(timeouts::DIFF_HTTP_MS))
        .build()
        .context("Failed to build HTTP client")?;
    let url = format!("http://{}{}", api_addr, ENDPOINT);
    let request = PathFileRequest { rpaths };

    loop {
        match query_listing(&client, &url, &request).await {
            Ok(listing) => return Ok(Some(listing)),
            Err(e) => warn!(url = %url, error = %e, "remote listing unavailable, retrying"),
        }
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

/// Run the whole startup pass.
pub async fn prime(
    api_addr: Option<&str>,
    mapper: &RemoteMapper,
    table: &TransferTable,
    pending: &PendingSet,
    shutdown: &CancellationToken,
) -> Result<()> {
    let Some(api_addr) = api_addr else {
        let n = enqueue_all(mapper, pending);
        info!(queued = n, "no diff API configured, queued every local file");
        return Ok(());
    };

    let retry = Duration::from_millis(timeouts::DIFF_RETRY_MS);
    let Some(listing) = fetch_listing(api_addr, mapper.remote_dirs(), retry, shutdown).await?
    else {
        return Ok(());
    };
    let summary = seed_from_listing(mapper, &listing, table, pending);
    info!(
        complete = summary.complete,
        partial = summary.partial,
        missing = summary.missing,
        "startup diff applied"
    );
    Ok(())
}
