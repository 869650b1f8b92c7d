//! Local document tree, HTTP transport and idempotent artifact acquisition for plangob.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use plangob_core::{sanitize_folder_name, Entity, Slot};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "plangob-storage";

/// Folder inside every entity directory that holds the slot documents.
pub const DOCUMENTS_SUBFOLDER: &str = "Documentos Gubernamentales";

/// `root/<entity>/Documentos Gubernamentales/<slot file>`
#[derive(Debug, Clone)]
pub struct DocumentLayout {
    root: PathBuf,
}

impl DocumentLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_dir(&self, identity: &str) -> PathBuf {
        self.root.join(identity)
    }

    pub fn documents_dir(&self, identity: &str) -> PathBuf {
        self.entity_dir(identity).join(DOCUMENTS_SUBFOLDER)
    }

    pub fn slot_path(&self, identity: &str, slot: Slot) -> PathBuf {
        self.documents_dir(identity).join(slot.file_name())
    }

    /// Enumerates the entity folders directly under the root, sorted by name.
    ///
    /// Hidden entries are skipped. Unreadable entries and failed probes never
    /// abort the scan: they count as absent.
    pub fn scan_local(&self) -> Vec<Entity> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(root = %self.root.display(), error = %err, "cannot read document root");
                return Vec::new();
            }
        };

        let mut names = entries
            .filter_map(|entry| entry.ok())
            // `Path::is_dir` follows symlinks, so linked party folders are kept.
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| match entry.file_name().into_string() {
                Ok(name) => Some(name),
                Err(raw) => {
                    warn!(name = ?raw, "skipping folder with non UTF-8 name");
                    None
                }
            })
            .filter(|name| !name.starts_with('.'))
            .collect::<Vec<_>>();
        names.sort();

        names
            .into_iter()
            .map(|name| {
                if sanitize_folder_name(&name) != name {
                    warn!(folder = %name, "folder name is not in sanitized form");
                }
                let satisfied = Slot::ALL
                    .into_iter()
                    .filter(|slot| is_non_empty_file(&self.slot_path(&name, *slot)))
                    .collect::<Vec<_>>();
                Entity::new(name, satisfied)
            })
            .collect()
    }
}

/// `true` only for an existing regular file with at least one byte.
pub fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub byte_size: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Downloaded(StoredArtifact),
    AlreadyPresent(PathBuf),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty response body from {url}")]
    EmptyBody { url: String },
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AcquireError {
    fn filesystem(path: &Path, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Retrieves one artifact locator into a destination file.
#[async_trait]
pub trait ArtifactDownloader: Send + Sync {
    async fn download_to(&self, locator: &str, dest: &Path) -> Result<StoredArtifact, AcquireError>;
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: DocumentLayout,
}

impl ArtifactStore {
    pub fn new(layout: DocumentLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &DocumentLayout {
        &self.layout
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub async fn ensure_documents_dir(&self, identity: &str) -> Result<PathBuf, AcquireError> {
        let dir = self.layout.documents_dir(identity);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| AcquireError::filesystem(&dir, source))?;
        Ok(dir)
    }

    /// Fetches `locator` into the entity's slot file unless a non-empty file is already there.
    pub async fn acquire(
        &self,
        downloader: &dyn ArtifactDownloader,
        identity: &str,
        slot: Slot,
        locator: &str,
    ) -> Result<AcquireOutcome, AcquireError> {
        let dest = self.layout.slot_path(identity, slot);
        if is_non_empty_file(&dest) {
            debug!(path = %dest.display(), "artifact already present");
            return Ok(AcquireOutcome::AlreadyPresent(dest));
        }
        let stored = downloader.download_to(locator, &dest).await?;
        Ok(AcquireOutcome::Downloaded(stored))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub accept_invalid_certs: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            user_agent: None,
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// POSTs a JSON body and returns the full response body of a 2xx answer.
    pub async fn post_json<B>(&self, url: &str, body: &B) -> Result<Vec<u8>, FetchError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let span = info_span!("http_fetch", method = "POST", url);
        self.send_post(url, body).instrument(span).await
    }

    async fn send_post<B>(&self, url: &str, body: &B) -> Result<Vec<u8>, FetchError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn fetch_to_file(&self, locator: &str, dest: &Path) -> Result<StoredArtifact, AcquireError> {
        let resp = self.client.get(locator).send().await.map_err(FetchError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            }
            .into());
        }

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = parent.join(format!(".{}.part", Uuid::new_v4()));

        let (byte_size, content_hash) = match self.stream_body(resp, &temp_path).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(err);
            }
        };

        if byte_size == 0 {
            let _ = fs::remove_file(&temp_path).await;
            return Err(FetchError::EmptyBody {
                url: locator.to_string(),
            }
            .into());
        }

        if let Err(source) = fs::rename(&temp_path, dest).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(AcquireError::filesystem(dest, source));
        }

        Ok(StoredArtifact {
            path: dest.to_path_buf(),
            byte_size,
            content_hash,
        })
    }

    async fn stream_body(
        &self,
        mut resp: reqwest::Response,
        temp_path: &Path,
    ) -> Result<(u64, String), AcquireError> {
        let file = fs::File::create(temp_path)
            .await
            .map_err(|source| AcquireError::filesystem(temp_path, source))?;
        let mut writer = BufWriter::new(file);
        let mut hasher = Sha256::new();
        let mut byte_size = 0u64;

        while let Some(chunk) = resp.chunk().await.map_err(FetchError::from)? {
            hasher.update(&chunk);
            byte_size += chunk.len() as u64;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| AcquireError::filesystem(temp_path, source))?;
        }
        writer
            .flush()
            .await
            .map_err(|source| AcquireError::filesystem(temp_path, source))?;

        Ok((byte_size, hex::encode(hasher.finalize())))
    }
}

#[async_trait]
impl ArtifactDownloader for HttpFetcher {
    /// Streams the body into a hidden temp file next to `dest`, then renames it into place.
    async fn download_to(&self, locator: &str, dest: &Path) -> Result<StoredArtifact, AcquireError> {
        let span = info_span!("http_fetch", method = "GET", url = locator);
        self.fetch_to_file(locator, dest).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CountingDownloader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactDownloader for CountingDownloader {
        async fn download_to(&self, _locator: &str, dest: &Path) -> Result<StoredArtifact, AcquireError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, b"%PDF-1.4").map_err(|e| AcquireError::filesystem(dest, e))?;
            Ok(StoredArtifact {
                path: dest.to_path_buf(),
                byte_size: 8,
                content_hash: ArtifactStore::sha256_hex(b"%PDF-1.4"),
            })
        }
    }

    fn write_slot(layout: &DocumentLayout, identity: &str, slot: Slot, bytes: &[u8]) {
        std::fs::create_dir_all(layout.documents_dir(identity)).unwrap();
        std::fs::write(layout.slot_path(identity, slot), bytes).unwrap();
    }

    fn client() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: Some("plangob-test".into()),
            ..Default::default()
        })
        .expect("client")
    }

    #[test]
    fn artifact_hashing_is_stable() {
        let hash = ArtifactStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn slot_paths_follow_the_document_tree() {
        let layout = DocumentLayout::new("/data");
        assert_eq!(
            layout.slot_path("Fuerza Ejemplo", Slot::GovernmentPlan),
            PathBuf::from("/data/Fuerza Ejemplo/Documentos Gubernamentales/PLAN GOBIERNO.pdf")
        );
        assert_eq!(
            layout.slot_path("Fuerza Ejemplo", Slot::PlanSummary),
            PathBuf::from("/data/Fuerza Ejemplo/Documentos Gubernamentales/PLAN RESUMEN.pdf")
        );
    }

    #[test]
    fn scan_is_sorted_skips_hidden_and_probes_non_empty_slots() {
        let dir = tempdir().expect("tempdir");
        let layout = DocumentLayout::new(dir.path());
        std::fs::create_dir_all(dir.path().join("Zeta Unida")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a folder").unwrap();
        write_slot(&layout, "Alfa", Slot::GovernmentPlan, b"%PDF");
        write_slot(&layout, "Alfa", Slot::PlanSummary, b"");
        write_slot(&layout, "Fuerza Ejemplo", Slot::GovernmentPlan, b"%PDF");
        write_slot(&layout, "Fuerza Ejemplo", Slot::PlanSummary, b"%PDF");

        let entities = layout.scan_local();
        let names: Vec<_> = entities.iter().map(|e| e.identity()).collect();
        assert_eq!(names, vec!["Alfa", "Fuerza Ejemplo", "Zeta Unida"]);

        assert_eq!(entities[0].missing_slots(), vec![Slot::PlanSummary]);
        assert!(!entities[1].is_pending());
        assert_eq!(entities[2].missing_slots(), Slot::ALL.to_vec());
    }

    #[cfg(unix)]
    #[test]
    fn scan_follows_symlinked_entity_folders() {
        let dir = tempdir().expect("tempdir");
        let elsewhere = tempdir().expect("tempdir");
        let layout = DocumentLayout::new(dir.path());
        let target = elsewhere.path().join("ejemplo-libre-real");
        std::fs::create_dir_all(target.join(DOCUMENTS_SUBFOLDER)).unwrap();
        std::fs::write(target.join(DOCUMENTS_SUBFOLDER).join("PLAN GOBIERNO.pdf"), b"%PDF").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("Ejemplo Libre")).unwrap();
        std::os::unix::fs::symlink(
            elsewhere.path().join("missing"),
            dir.path().join("Enlace Roto"),
        )
        .unwrap();

        let entities = layout.scan_local();
        let names: Vec<_> = entities.iter().map(|e| e.identity()).collect();
        assert_eq!(names, vec!["Ejemplo Libre"]);
        assert_eq!(entities[0].missing_slots(), vec![Slot::PlanSummary]);
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let dir = tempdir().expect("tempdir");
        let layout = DocumentLayout::new(dir.path().join("does-not-exist"));
        assert!(layout.scan_local().is_empty());
    }

    #[tokio::test]
    async fn acquire_skips_non_empty_destination() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(DocumentLayout::new(dir.path()));
        write_slot(store.layout(), "Ejemplo", Slot::GovernmentPlan, b"%PDF");
        let downloader = CountingDownloader::default();

        let outcome = store
            .acquire(&downloader, "Ejemplo", Slot::GovernmentPlan, "https://x/plan.pdf")
            .await
            .expect("acquire");

        assert!(matches!(outcome, AcquireOutcome::AlreadyPresent(_)));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn acquire_replaces_empty_destination() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(DocumentLayout::new(dir.path()));
        write_slot(store.layout(), "Ejemplo", Slot::PlanSummary, b"");
        let downloader = CountingDownloader::default();

        let outcome = store
            .acquire(&downloader, "Ejemplo", Slot::PlanSummary, "https://x/resumen.pdf")
            .await
            .expect("acquire");

        assert!(matches!(outcome, AcquireOutcome::Downloaded(_)));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
        assert!(is_non_empty_file(&store.layout().slot_path("Ejemplo", Slot::PlanSummary)));
    }

    #[tokio::test]
    async fn download_streams_body_to_destination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/plan.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("PLAN GOBIERNO.pdf");
        let stored = client()
            .download_to(&format!("{}/docs/plan.pdf", server.uri()), &dest)
            .await
            .expect("download");

        assert_eq!(stored.byte_size, 11);
        assert_eq!(
            stored.content_hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file must be renamed away");
    }

    #[tokio::test]
    async fn post_json_returns_the_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(br#"{"data":[]}"#.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let body = client()
            .post_json(&format!("{}/search", server.uri()), &serde_json::json!({"skip": 1}))
            .await
            .expect("post");

        assert_eq!(body, br#"{"data":[]}"#.to_vec());
    }

    #[tokio::test]
    async fn download_error_status_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("PLAN RESUMEN.pdf");
        let err = client()
            .download_to(&format!("{}/missing.pdf", server.uri()), &dest)
            .await
            .expect_err("404 must fail");

        assert!(matches!(
            err,
            AcquireError::Transport(FetchError::HttpStatus { status: 404, .. })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_body_is_a_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty.pdf"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("PLAN RESUMEN.pdf");
        let err = client()
            .download_to(&format!("{}/empty.pdf", server.uri()), &dest)
            .await
            .expect_err("empty body must fail");

        assert!(matches!(err, AcquireError::Transport(FetchError::EmptyBody { .. })));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn download_into_missing_directory_is_a_filesystem_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plan.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("absent").join("PLAN GOBIERNO.pdf");
        let err = client()
            .download_to(&format!("{}/plan.pdf", server.uri()), &dest)
            .await
            .expect_err("missing parent must fail");

        assert!(matches!(err, AcquireError::Filesystem { .. }));
    }
}
