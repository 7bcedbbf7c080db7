use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{info, warn};

use crate::models::error::StartupError;

// ---------------------------------------------------------------------------
// Artifact specs
// ---------------------------------------------------------------------------

/// A model file fetched at startup. Presence plus a minimum plausible size is
/// the only integrity check — there is no checksum verification.
#[derive(Debug, Clone)]
pub struct ArtifactSpec<'a> {
    pub filename: &'a str,
    pub min_bytes: u64,
    /// Primary URL first, then fallback mirrors, tried in order.
    pub mirrors: &'a [&'a str],
}

/// Classical colorization network graph, exported to ONNX up to the 313-bin
/// chrominance distribution logits.
pub const ZHANG_MODEL: ArtifactSpec<'static> = ArtifactSpec {
    filename: "colorization_release_v2.onnx",
    min_bytes: 1_048_576,
    mirrors: &[
        "https://huggingface.co/rich-zhang/colorization-onnx/resolve/main/colorization_release_v2.onnx",
        "https://storage.googleapis.com/colorize-api-models/colorization_release_v2.onnx",
    ],
};

/// The 313 ab-space cluster centers used by the annealed-mean decode.
pub const PTS_IN_HULL: ArtifactSpec<'static> = ArtifactSpec {
    filename: "pts_in_hull.npy",
    min_bytes: 1_024,
    mirrors: &[
        "https://raw.githubusercontent.com/richzhang/colorization/master/resources/pts_in_hull.npy",
        "https://cdn.jsdelivr.net/gh/richzhang/colorization@master/resources/pts_in_hull.npy",
    ],
};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct ArtifactStore {
    dir: PathBuf,
    client: reqwest::Client,
}

impl ArtifactStore {
    pub fn new(models_dir: impl Into<PathBuf>, attempt_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .build()
            .unwrap_or_default();
        Self {
            dir: models_dir.into(),
            client,
        }
    }

    pub fn path_for(&self, spec: &ArtifactSpec<'_>) -> PathBuf {
        self.dir.join(spec.filename)
    }

    /// Returns the local path of the artifact, downloading it via the ordered
    /// mirror list when missing or implausibly small. Exhausting every mirror
    /// is fatal; a partially written file is never left behind.
    pub async fn ensure(&self, spec: &ArtifactSpec<'_>) -> Result<PathBuf, StartupError> {
        let path = self.path_for(spec);

        if let Ok(meta) = fs::metadata(&path).await {
            if meta.len() >= spec.min_bytes {
                info!(artifact = spec.filename, size = meta.len(), "Reusing existing artifact");
                return Ok(path);
            }
            warn!(
                artifact = spec.filename,
                size = meta.len(),
                "Existing artifact below minimum plausible size, re-downloading"
            );
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StartupError::ArtifactIo {
                name: spec.filename.to_string(),
                source: e,
            })?;

        let part_path = path.with_extension("part");
        for url in spec.mirrors {
            info!(artifact = spec.filename, url, "Downloading artifact");
            match self.fetch_to(url, &part_path).await {
                Ok(size) if size >= spec.min_bytes => {
                    fs::rename(&part_path, &path)
                        .await
                        .map_err(|e| StartupError::ArtifactIo {
                            name: spec.filename.to_string(),
                            source: e,
                        })?;
                    info!(artifact = spec.filename, size, "Artifact downloaded");
                    return Ok(path);
                }
                Ok(size) => {
                    warn!(
                        artifact = spec.filename,
                        url, size, "Mirror returned an implausibly small body, trying next"
                    );
                }
                Err(e) => {
                    warn!(artifact = spec.filename, url, error = %e, "Mirror failed, trying next");
                }
            }
        }

        let _ = fs::remove_file(&part_path).await;
        Err(StartupError::MirrorsExhausted {
            name: spec.filename.to_string(),
            mirrors: spec.mirrors.len(),
        })
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| format!("body read failed: {}", e))?;

        fs::write(dest, &body)
            .await
            .map_err(|e| format!("write failed: {}", e))?;

        Ok(body.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;

    const BIG_BODY: &[u8] = &[0xAB; 4096];

    async fn spawn_stub(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn spec<'a>(mirrors: &'a [&'a str]) -> ArtifactSpec<'a> {
        ArtifactSpec {
            filename: "stub.bin",
            min_bytes: 1_024,
            mirrors,
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_mirror_on_404() {
        let addr = spawn_stub(
            Router::new()
                .route("/missing", get(|| async { axum::http::StatusCode::NOT_FOUND }))
                .route("/good", get(|| async { BIG_BODY.to_vec() })),
        )
        .await;

        let urls = [format!("http://{}/missing", addr), format!("http://{}/good", addr)];
        let mirrors: Vec<&str> = urls.iter().map(String::as_str).collect();

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), Duration::from_secs(5));
        let path = store.ensure(&spec(&mirrors)).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), BIG_BODY);
    }

    #[tokio::test]
    async fn exhausted_mirrors_fail_without_partial_file() {
        let addr = spawn_stub(Router::new().route(
            "/missing",
            get(|| async { axum::http::StatusCode::NOT_FOUND }),
        ))
        .await;

        let urls = [format!("http://{}/missing", addr), format!("http://{}/missing", addr)];
        let mirrors: Vec<&str> = urls.iter().map(String::as_str).collect();

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), Duration::from_secs(5));
        let spec = spec(&mirrors);
        let err = store.ensure(&spec).await.unwrap_err();

        assert!(matches!(err, StartupError::MirrorsExhausted { mirrors: 2, .. }));
        assert!(!store.path_for(&spec).exists());
        assert!(!store.path_for(&spec).with_extension("part").exists());
    }

    #[tokio::test]
    async fn existing_plausible_file_is_reused_without_network() {
        let dir = tempfile::tempdir().unwrap();
        // No stub server at all: any network attempt would fail the test.
        let mirrors = ["http://127.0.0.1:1/unreachable"];
        let spec = spec(&mirrors);

        let store = ArtifactStore::new(dir.path(), Duration::from_secs(1));
        std::fs::write(store.path_for(&spec), vec![7u8; 2048]).unwrap();

        let path = store.ensure(&spec).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn undersized_body_falls_through_to_next_mirror() {
        let addr = spawn_stub(
            Router::new()
                .route("/tiny", get(|| async { vec![1u8; 16] }))
                .route("/good", get(|| async { BIG_BODY.to_vec() })),
        )
        .await;

        let urls = [format!("http://{}/tiny", addr), format!("http://{}/good", addr)];
        let mirrors: Vec<&str> = urls.iter().map(String::as_str).collect();

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), Duration::from_secs(5));
        let path = store.ensure(&spec(&mirrors)).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), BIG_BODY);
    }
}
