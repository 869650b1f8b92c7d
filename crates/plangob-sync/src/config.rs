use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use plangob_catalog::{CatalogFilter, DEFAULT_CATALOG_URL, DEFAULT_USER_AGENT};
use plangob_storage::HttpClientConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("page size must be at least 1")]
    ZeroPageSize,
    #[error("similarity threshold {0} is outside 0..=1")]
    Threshold(f64),
    #[error("reading config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    Substring,
    Similarity,
}

impl FromStr for MatchStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" => Ok(Self::Substring),
            "similarity" => Ok(Self::Similarity),
            _ => Err(ConfigError::InvalidValue {
                key: "match_strategy",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub root_dir: PathBuf,
    pub catalog_url: String,
    pub page_size: u32,
    pub max_pages: u32,
    /// Certificate validation for catalog and artifact requests.
    pub verify_tls: bool,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub process_id: u32,
    pub election_type: String,
    pub match_strategy: MatchStrategy,
    pub similarity_threshold: f64,
    pub reports_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            page_size: 10,
            max_pages: 4,
            verify_tls: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 120,
            process_id: 124,
            election_type: "1".to_string(),
            match_strategy: MatchStrategy::Substring,
            similarity_threshold: 0.92,
            reports_dir: None,
        }
    }
}

/// Optional YAML overrides; every key mirrors a [`SyncConfig`] field.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SyncConfigFile {
    root_dir: Option<PathBuf>,
    catalog_url: Option<String>,
    page_size: Option<u32>,
    max_pages: Option<u32>,
    verify_tls: Option<bool>,
    user_agent: Option<String>,
    http_timeout_secs: Option<u64>,
    process_id: Option<u32>,
    election_type: Option<String>,
    match_strategy: Option<MatchStrategy>,
    similarity_threshold: Option<f64>,
    reports_dir: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `PLANGOB_*` variables provided by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(root) = lookup("PLANGOB_ROOT") {
            config.root_dir = PathBuf::from(root);
        }
        if let Some(url) = lookup("PLANGOB_CATALOG_URL") {
            config.catalog_url = url;
        }
        if let Some(v) = lookup("PLANGOB_PAGE_SIZE") {
            config.page_size = parse_value("PLANGOB_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("PLANGOB_MAX_PAGES") {
            config.max_pages = parse_value("PLANGOB_MAX_PAGES", &v)?;
        }
        if let Some(v) = lookup("PLANGOB_INSECURE_TLS") {
            config.verify_tls = !parse_flag("PLANGOB_INSECURE_TLS", &v)?;
        }
        if let Some(ua) = lookup("PLANGOB_USER_AGENT") {
            config.user_agent = ua;
        }
        if let Some(v) = lookup("PLANGOB_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = parse_value("PLANGOB_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PLANGOB_PROCESS_ID") {
            config.process_id = parse_value("PLANGOB_PROCESS_ID", &v)?;
        }
        if let Some(v) = lookup("PLANGOB_ELECTION_TYPE") {
            config.election_type = v;
        }
        if let Some(v) = lookup("PLANGOB_MATCHER") {
            config.match_strategy = v.parse()?;
        }
        if let Some(v) = lookup("PLANGOB_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = parse_value("PLANGOB_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(dir) = lookup("PLANGOB_REPORTS_DIR").filter(|d| !d.trim().is_empty()) {
            config.reports_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Layers a YAML file on top of the current values.
    pub fn with_file_overrides(mut self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: SyncConfigFile = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.root_dir {
            self.root_dir = v;
        }
        if let Some(v) = file.catalog_url {
            self.catalog_url = v;
        }
        if let Some(v) = file.page_size {
            self.page_size = v;
        }
        if let Some(v) = file.max_pages {
            self.max_pages = v;
        }
        if let Some(v) = file.verify_tls {
            self.verify_tls = v;
        }
        if let Some(v) = file.user_agent {
            self.user_agent = v;
        }
        if let Some(v) = file.http_timeout_secs {
            self.http_timeout_secs = v;
        }
        if let Some(v) = file.process_id {
            self.process_id = v;
        }
        if let Some(v) = file.election_type {
            self.election_type = v;
        }
        if let Some(v) = file.match_strategy {
            self.match_strategy = v;
        }
        if let Some(v) = file.similarity_threshold {
            self.similarity_threshold = v;
        }
        if let Some(v) = file.reports_dir {
            self.reports_dir = Some(v);
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Threshold(self.similarity_threshold));
        }
        Ok(())
    }

    pub fn catalog_filter(&self) -> CatalogFilter {
        CatalogFilter {
            process_id: self.process_id,
            election_type: self.election_type.clone(),
            ..CatalogFilter::default()
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            accept_invalid_certs: !self.verify_tls,
        }
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" | "TRUE" | "True" | "yes" => Ok(true),
        "0" | "false" | "FALSE" | "False" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
