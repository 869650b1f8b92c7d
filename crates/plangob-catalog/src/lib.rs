//! Remote catalog contract and the JNE government-plan search client.

use std::sync::Arc;

use async_trait::async_trait;
use plangob_core::{RemoteRecord, Slot};
use plangob_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "plangob-catalog";

pub const DEFAULT_CATALOG_URL: &str =
    "https://apiplataformaelectoral9.jne.gob.pe/api/v1/plan-gobierno/busqueda-avanzada";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog page {page} transport failure: {source}")]
    Transport {
        page: u32,
        #[source]
        source: FetchError,
    },
    #[error("catalog page {page} is not valid JSON: {source}")]
    Parse {
        page: u32,
        #[source]
        source: serde_json::Error,
    },
}

/// A paged source of remote records. Pages are 1-based; an empty page ends the listing.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_page(&self, page: u32) -> Result<Vec<RemoteRecord>, CatalogError>;
}

/// Fixed search filter sent with every page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFilter {
    #[serde(rename = "idProcesoElectoral")]
    pub process_id: u32,
    #[serde(rename = "idTipoEleccion")]
    pub election_type: String,
    #[serde(rename = "idOrganizacionPolitica")]
    pub organization_id: String,
    #[serde(rename = "txDatoCandidato")]
    pub candidate_text: String,
    #[serde(rename = "idJuradoElectoral")]
    pub electoral_board_id: u32,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            process_id: 124,
            election_type: "1".to_string(),
            organization_id: "0".to_string(),
            candidate_text: String::new(),
            electoral_board_id: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogQuery<'a> {
    pub page_size: u32,
    /// Page index, 1-based despite the field name.
    pub skip: u32,
    pub filter: &'a CatalogFilter,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    data: Option<Vec<CatalogItem>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogItem {
    #[serde(rename = "txOrganizacionPolitica", default)]
    organization: Option<String>,
    #[serde(rename = "txRutaCompleto", default)]
    full_plan_url: Option<String>,
    #[serde(rename = "txRutaResumen", default)]
    summary_plan_url: Option<String>,
}

impl From<CatalogItem> for RemoteRecord {
    fn from(item: CatalogItem) -> Self {
        RemoteRecord::new(item.organization.unwrap_or_default())
            .with_locator(Slot::GovernmentPlan, item.full_plan_url.as_deref())
            .with_locator(Slot::PlanSummary, item.summary_plan_url.as_deref())
    }
}

/// Decodes one search response. A missing or `null` `data` field is an empty page.
pub fn parse_catalog_page(page: u32, body: &[u8]) -> Result<Vec<RemoteRecord>, CatalogError> {
    let response: CatalogResponse =
        serde_json::from_slice(body).map_err(|source| CatalogError::Parse { page, source })?;
    Ok(response
        .data
        .unwrap_or_default()
        .into_iter()
        .map(RemoteRecord::from)
        .collect())
}

pub struct JneCatalog {
    http: Arc<HttpFetcher>,
    endpoint: String,
    page_size: u32,
    filter: CatalogFilter,
}

impl JneCatalog {
    pub fn new(http: Arc<HttpFetcher>, endpoint: impl Into<String>, page_size: u32) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            page_size,
            filter: CatalogFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: CatalogFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn query(&self, page: u32) -> CatalogQuery<'_> {
        CatalogQuery {
            page_size: self.page_size,
            skip: page,
            filter: &self.filter,
        }
    }
}

#[async_trait]
impl CatalogSource for JneCatalog {
    fn source_id(&self) -> &str {
        "jne-plan-gobierno"
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<RemoteRecord>, CatalogError> {
        let body = self
            .http
            .post_json(&self.endpoint, &self.query(page))
            .await
            .map_err(|source| CatalogError::Transport { page, source })?;
        let records = parse_catalog_page(page, &body)?;
        debug!(page, records = records.len(), "catalog page decoded");
        Ok(records)
    }
}
