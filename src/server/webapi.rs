//! HTTP listing endpoint queried by clients at startup.
//!
//! `POST /api/getpathfile` with `{"rpaths": [...]}` answers with every file
//! already stored under each requested directory, so a restarting client
//! can skip or resume instead of resending.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::diff::{list_files, PathFileRequest, PathFileResponse, PathFiles, ENDPOINT};
use crate::paths::resolve_under_root;

pub struct ListingServer {
    listener: TcpListener,
    root: Arc<PathBuf>,
}

impl ListingServer {
    pub async fn bind(addr: &str, root: PathBuf) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind listing API on {}", addr))?;
        Ok(Self {
            listener,
            root: Arc::new(root),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr()?, "listing API listening");
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(error = %e, "listing API accept failed");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let root = Arc::clone(&self.root);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let root = Arc::clone(&root);
                            async move { handle_request(req, root).await }
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(peer = %peer, error = %e, "listing API connection error");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("listing API shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn json_response(status: StatusCode, body: &PathFileResponse) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut resp = Response::new(Full::new(Bytes::from(bytes)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    root: Arc<PathBuf>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() != ENDPOINT {
        let mut resp = Response::new(Full::new(Bytes::from("Not Found")));
        *resp.status_mut() = StatusCode::NOT_FOUND;
        return Ok(resp);
    }

    let body = req.into_body().collect().await?.to_bytes();
    let request: PathFileRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "bad listing request");
            let failed = PathFileResponse {
                result: 1,
                pathfiles: Vec::new(),
            };
            return Ok(json_response(StatusCode::BAD_REQUEST, &failed));
        }
    };

    let listing = tokio::task::spawn_blocking(move || build_listing(&root, &request)).await;
    match listing {
        Ok(listing) => Ok(json_response(StatusCode::OK, &listing)),
        Err(e) => {
            error!(error = %e, "listing task failed");
            let failed = PathFileResponse {
                result: 1,
                pathfiles: Vec::new(),
            };
            Ok(json_response(StatusCode::INTERNAL_SERVER_ERROR, &failed))
        }
    }
}

fn listing_dir(root: &Path, rpath: &str) -> Option<PathBuf> {
    if rpath.trim_matches('/').is_empty() {
        return Some(root.to_path_buf());
    }
    resolve_under_root(root, rpath).ok()
}

/// Answer a listing request from the tree under `root`.
pub fn build_listing(root: &Path, request: &PathFileRequest) -> PathFileResponse {
    let pathfiles = request
        .rpaths
        .iter()
        .map(|rpath| PathFiles {
            path: rpath.clone(),
            files: listing_dir(root, rpath)
                .map(|dir| list_files(&dir))
                .unwrap_or_default(),
        })
        .collect();
    PathFileResponse {
        result: 0,
        pathfiles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn listing_echoes_requested_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pre/app/sub")).unwrap();
        fs::write(dir.path().join("pre/app/a.log"), b"abc").unwrap();
        fs::write(dir.path().join("pre/app/sub/b.log"), b"de").unwrap();

        let req = PathFileRequest {
            rpaths: vec!["/pre/app".into(), "/nothing".into(), "/../etc".into()],
        };
        let resp = build_listing(dir.path(), &req);
        assert_eq!(resp.result, 0);
        assert_eq!(resp.pathfiles.len(), 3);
        assert_eq!(resp.pathfiles[0].path, "/pre/app");
        let names: Vec<_> = resp.pathfiles[0]
            .files
            .iter()
            .map(|f| (f.filename.as_str(), f.size))
            .collect();
        assert_eq!(names, vec![("a.log", 3), ("sub/b.log", 2)]);
        assert!(resp.pathfiles[1].files.is_empty());
        assert!(resp.pathfiles[2].files.is_empty());
    }

    #[tokio::test]
    async fn serves_listing_over_http() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/x"), b"12345").unwrap();

        let server = ListingServer::bind("127.0.0.1:0", dir.path().to_path_buf())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));

        let resp: PathFileResponse = reqwest::Client::new()
            .post(format!("http://{}{}", addr, ENDPOINT))
            .json(&PathFileRequest {
                rpaths: vec!["/app".into()],
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp.pathfiles[0].files[0].filename, "x");
        assert_eq!(resp.pathfiles[0].files[0].size, 5);

        let missing = reqwest::get(format!("http://{}/other", addr)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
