//! Minimal MediaWiki API client.
//!
//! Only the two calls the city stages need: multi-title `action=query` with
//! redirect resolution, and `action=parse&prop=parsetree`.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use etlflow_shared::{EtlError, Result, WikipediaConfig};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("etlflow/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow at the HTTP level.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Body of an `action=query` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResult {
    /// Case/underscore normalizations applied to the requested titles.
    #[serde(default)]
    pub normalized: Vec<TitleMapping>,
    /// Redirects followed from the requested titles.
    #[serde(default)]
    pub redirects: Vec<TitleMapping>,
    /// Pages keyed by page id (negative ids for missing pages).
    #[serde(default)]
    pub pages: BTreeMap<String, PageInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TitleMapping {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    pub title: String,
    #[serde(default)]
    missing: Option<serde_json::Value>,
}

impl PageInfo {
    pub fn is_missing(&self) -> bool {
        self.missing.is_some()
    }
}

/// Where a requested title ended up after normalization and redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The page exists under this title.
    Found(String),
    /// The page does not exist; carries the title that was looked up.
    Missing(String),
}

impl QueryResult {
    /// Follow `title` through normalization and redirects to its page.
    pub fn resolve(&self, title: &str) -> Resolution {
        let normalized = lookup(&self.normalized, title);
        let target = lookup(&self.redirects, normalized);

        match self.pages.values().find(|page| page.title == target) {
            Some(page) if !page.is_missing() => Resolution::Found(page.title.clone()),
            _ => Resolution::Missing(target.to_string()),
        }
    }
}

fn lookup<'a>(mappings: &'a [TitleMapping], title: &'a str) -> &'a str {
    mappings
        .iter()
        .find(|m| m.from == title)
        .map(|m| m.to.as_str())
        .unwrap_or(title)
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    query: Option<QueryResult>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ParseEnvelope {
    parse: Option<ParseBody>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ParseBody {
    parsetree: ParseTreeText,
}

#[derive(Debug, Deserialize)]
struct ParseTreeText {
    #[serde(rename = "*")]
    text: String,
}

// ---------------------------------------------------------------------------
// WikiClient
// ---------------------------------------------------------------------------

/// HTTP client bound to one MediaWiki `api.php` endpoint.
#[derive(Debug, Clone)]
pub struct WikiClient {
    client: Client,
    api_url: Url,
}

impl WikiClient {
    /// Build a client from the `[wikipedia]` config section.
    pub fn new(config: &WikipediaConfig) -> Result<Self> {
        Self::with_api_url(config.api_url()?, Duration::from_secs(config.timeout_secs))
    }

    /// Build a client for an explicit endpoint.
    pub fn with_api_url(api_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| EtlError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_url })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Look up several titles at once, following redirects.
    pub async fn query_titles(&self, titles: &[String]) -> Result<QueryResult> {
        let joined = titles.join("|");
        let envelope: QueryEnvelope = self
            .get(&[("action", "query"), ("redirects", "1"), ("titles", joined.as_str())])
            .await?;

        if let Some(err) = envelope.error {
            return Err(api_error(err));
        }
        Ok(envelope.query.unwrap_or_default())
    }

    /// Fetch the raw XML parse tree of `page`.
    pub async fn parse_tree(&self, page: &str) -> Result<String> {
        let envelope: ParseEnvelope = self
            .get(&[
                ("action", "parse"),
                ("redirects", "1"),
                ("prop", "parsetree"),
                ("page", page),
            ])
            .await?;

        if let Some(err) = envelope.error {
            return Err(api_error(err));
        }
        envelope
            .parse
            .map(|body| body.parsetree.text)
            .ok_or_else(|| EtlError::parse(format!("no parse tree returned for '{page}'")))
    }

    async fn get<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T> {
        debug!(url = %self.api_url, ?params, "MediaWiki request");

        let response = self
            .client
            .get(self.api_url.clone())
            .query(&[("format", "json")])
            .query(params)
            .send()
            .await
            .map_err(|e| EtlError::Network(format!("{}: {e}", self.api_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EtlError::Network(format!(
                "{}: HTTP {status}",
                self.api_url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| EtlError::Network(format!("{}: failed to read body: {e}", self.api_url)))?;

        serde_json::from_str(&body)
            .map_err(|e| EtlError::parse(format!("unexpected MediaWiki response: {e}")))
    }
}

fn api_error(err: ApiError) -> EtlError {
    EtlError::validation(format!("MediaWiki error '{}': {}", err.code, err.info))
}
