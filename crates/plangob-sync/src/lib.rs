//! Fetch pipeline: pages through the remote catalog, matches records to pending
//! entity folders and acquires their missing documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use plangob_catalog::{CatalogSource, JneCatalog};
use plangob_core::{EntityRegistry, RemoteRecord, Slot};
use plangob_storage::{AcquireOutcome, ArtifactDownloader, ArtifactStore, DocumentLayout, HttpFetcher};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod matcher;

pub use config::{ConfigError, MatchStrategy, SyncConfig};
pub use matcher::{matcher_for, NameMatcher, SimilarityMatcher, SubstringMatcher};

pub const CRATE_NAME: &str = "plangob-sync";

/// Paging state machine. `Failed` is transient: the run moves on to the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Paging { page: u32 },
    Done,
    Failed { page: u32, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub page: u32,
    pub records: usize,
    pub matched: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquiredArtifact {
    pub entity: String,
    pub slot: Slot,
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_state: PipelineState,
    pub entities: usize,
    pub pending_before: usize,
    pub pending_after: usize,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub records_seen: usize,
    pub records_matched: usize,
    pub downloaded: usize,
    pub already_present: usize,
    pub missing_locators: usize,
    pub failed: usize,
    pub pages: Vec<PageReport>,
    pub artifacts: Vec<AcquiredArtifact>,
    pub report_path: Option<String>,
}

#[derive(Debug, Default)]
struct RunTally {
    pages_fetched: usize,
    pages_failed: usize,
    records_seen: usize,
    records_matched: usize,
    downloaded: usize,
    already_present: usize,
    missing_locators: usize,
    failed: usize,
    pages: Vec<PageReport>,
    artifacts: Vec<AcquiredArtifact>,
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: ArtifactStore,
    catalog: Box<dyn CatalogSource>,
    downloader: Arc<dyn ArtifactDownloader>,
    matcher: Box<dyn NameMatcher>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate().context("validating sync config")?;
        if !config.verify_tls {
            warn!("TLS certificate validation is disabled for catalog and document requests");
        }
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let catalog = JneCatalog::new(http.clone(), config.catalog_url.clone(), config.page_size)
            .with_filter(config.catalog_filter());
        Ok(Self::with_parts(config, Box::new(catalog), http))
    }

    /// Assembles a pipeline around explicit collaborators; the matcher follows the config.
    pub fn with_parts(
        config: SyncConfig,
        catalog: Box<dyn CatalogSource>,
        downloader: Arc<dyn ArtifactDownloader>,
    ) -> Self {
        let store = ArtifactStore::new(DocumentLayout::new(config.root_dir.clone()));
        let matcher = matcher_for(config.match_strategy, config.similarity_threshold);
        Self {
            config,
            store,
            catalog,
            downloader,
            matcher,
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn NameMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn scan_registry(&self) -> EntityRegistry {
        EntityRegistry::from_entities(self.store.layout().scan_local())
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let mut registry = self.scan_registry();
        self.run_with_registry(&mut registry).await
    }

    /// Runs one sync against an already-scanned registry, updating it as slots land.
    pub async fn run_with_registry(&self, registry: &mut EntityRegistry) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, source = self.catalog.source_id());
        self.run_inner(run_id, registry).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, registry: &mut EntityRegistry) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let pending_before = registry.pending().len();
        info!(
            entities = registry.len(),
            complete = registry.len() - pending_before,
            pending = pending_before,
            "local entity folders scanned"
        );

        let mut tally = RunTally::default();
        let mut state = if pending_before == 0 {
            info!("every entity folder is complete; skipping catalog requests");
            PipelineState::Done
        } else if self.config.max_pages == 0 {
            PipelineState::Done
        } else {
            PipelineState::Paging { page: 1 }
        };

        while let PipelineState::Paging { page } = state {
            state = match self.process_page(page, registry, &mut tally).await {
                PipelineState::Failed { page, reason } => {
                    warn!(page, %reason, "catalog page failed; continuing with next page");
                    tally.pages_failed += 1;
                    tally.pages.push(PageReport {
                        page,
                        records: 0,
                        matched: 0,
                        error: Some(reason),
                    });
                    self.next_page(page)
                }
                other => other,
            };
        }

        let mut summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            final_state: state,
            entities: registry.len(),
            pending_before,
            pending_after: registry.pending().len(),
            pages_fetched: tally.pages_fetched,
            pages_failed: tally.pages_failed,
            records_seen: tally.records_seen,
            records_matched: tally.records_matched,
            downloaded: tally.downloaded,
            already_present: tally.already_present,
            missing_locators: tally.missing_locators,
            failed: tally.failed,
            pages: tally.pages,
            artifacts: tally.artifacts,
            report_path: None,
        };

        if let Some(reports_dir) = &self.config.reports_dir {
            match write_report(reports_dir, &summary).await {
                Ok(path) => summary.report_path = Some(path.display().to_string()),
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(error = %reason, "could not write sync report; run result kept");
                }
            }
        }

        info!(
            pending_before = summary.pending_before,
            pending_after = summary.pending_after,
            downloaded = summary.downloaded,
            failed = summary.failed,
            "sync finished"
        );
        Ok(summary)
    }

    fn next_page(&self, page: u32) -> PipelineState {
        if page >= self.config.max_pages {
            PipelineState::Done
        } else {
            PipelineState::Paging { page: page + 1 }
        }
    }

    async fn process_page(
        &self,
        page: u32,
        registry: &mut EntityRegistry,
        tally: &mut RunTally,
    ) -> PipelineState {
        info!(page, "requesting catalog page");
        let records = match self.catalog.fetch_page(page).await {
            Ok(records) => records,
            Err(err) => {
                return PipelineState::Failed {
                    page,
                    reason: err.to_string(),
                }
            }
        };
        tally.pages_fetched += 1;

        if records.is_empty() {
            info!(page, "empty catalog page; listing exhausted");
            tally.pages.push(PageReport {
                page,
                records: 0,
                matched: 0,
                error: None,
            });
            return PipelineState::Done;
        }

        let matched_before = tally.records_matched;
        for record in &records {
            tally.records_seen += 1;
            self.process_record(record, registry, tally).await;
        }
        tally.pages.push(PageReport {
            page,
            records: records.len(),
            matched: tally.records_matched - matched_before,
            error: None,
        });

        self.next_page(page)
    }

    async fn process_record(
        &self,
        record: &RemoteRecord,
        registry: &mut EntityRegistry,
        tally: &mut RunTally,
    ) {
        let normalized = record.normalized_name();
        let (entity_id, identity, missing) = {
            let pending = registry.pending();
            let Some(entity) = self.matcher.find_match(&normalized, &pending).entity() else {
                debug!(remote = %record.raw_name, "no pending entity matches");
                return;
            };
            (entity.id(), entity.identity().to_string(), entity.missing_slots())
        };
        tally.records_matched += 1;
        info!(remote = %record.raw_name, entity = %identity, "matched catalog record");

        let mut attempts = Vec::new();
        for slot in missing {
            match record.locator(slot) {
                Some(locator) => attempts.push((slot, locator)),
                None => {
                    tally.missing_locators += 1;
                    info!(entity = %identity, %slot, "record has no locator for slot");
                }
            }
        }
        if attempts.is_empty() {
            return;
        }

        if let Err(err) = self.store.ensure_documents_dir(&identity).await {
            warn!(entity = %identity, error = %err, "cannot prepare documents folder");
            tally.failed += attempts.len();
            return;
        }

        for (slot, locator) in attempts {
            match self
                .store
                .acquire(self.downloader.as_ref(), &identity, slot, locator)
                .await
            {
                Ok(AcquireOutcome::Downloaded(stored)) => {
                    info!(entity = %identity, %slot, bytes = stored.byte_size, "document downloaded");
                    registry.mark_satisfied(entity_id, slot);
                    tally.downloaded += 1;
                    tally.artifacts.push(AcquiredArtifact {
                        entity: identity.clone(),
                        slot,
                        path: stored.path.display().to_string(),
                        bytes: stored.byte_size,
                        sha256: stored.content_hash,
                    });
                }
                Ok(AcquireOutcome::AlreadyPresent(path)) => {
                    debug!(entity = %identity, %slot, path = %path.display(), "document already on disk");
                    registry.mark_satisfied(entity_id, slot);
                    tally.already_present += 1;
                }
                Err(err) => {
                    warn!(entity = %identity, %slot, %locator, error = %err, "document download failed");
                    tally.failed += 1;
                }
            }
        }
    }
}

async fn write_report(reports_dir: &Path, summary: &SyncRunSummary) -> Result<PathBuf> {
    let run_dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;
    let path = run_dir.join("sync_summary.json");
    let bytes = serde_json::to_vec_pretty(summary).context("serializing sync summary")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env().context("loading PLANGOB_* configuration")?;
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_once().await
}
