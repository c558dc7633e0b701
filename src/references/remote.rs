//! Semantic Scholar graph API client.
//!
//! Two calls per document: a title search for the best match, then that
//! paper's reference list. Calls return [`RemoteError`]; retry and fallback
//! decisions belong to the caller.
//!
//! API: `https://api.semanticscholar.org/graph/v1`. Set `S2_API_KEY` to use
//! an authenticated rate limit.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::ReferencesConfig;
use crate::models::RemoteReference;

const SEARCH_FIELDS: &str = "title,referenceCount,references,url,authors";
const REFERENCE_FIELDS: &str = "title,authors,url,year,referenceCount";

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether another attempt could succeed. Non-2xx statuses and transport
    /// failures are transient; a body that does not decode is not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RemoteError::Decode(_))
    }
}

/// External bibliographic lookup.
#[async_trait]
pub trait BibliographicApi: Send + Sync {
    /// Identifier of the best title match, if any.
    async fn search_paper_id(&self, title: &str) -> Result<Option<String>, RemoteError>;

    /// References of the paper with `paper_id`.
    async fn fetch_references(&self, paper_id: &str)
        -> Result<Vec<RemoteReference>, RemoteError>;
}

pub struct SemanticScholarClient {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(config: &ReferencesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: std::env::var("S2_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let mut request = self.client.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BibliographicApi for SemanticScholarClient {
    #[instrument(skip(self))]
    async fn search_paper_id(&self, title: &str) -> Result<Option<String>, RemoteError> {
        let url = format!("{}/paper/search", self.api_base);
        let body: SearchResponse = self
            .get_json(
                &url,
                &[("query", title), ("limit", "1"), ("fields", SEARCH_FIELDS)],
            )
            .await?;
        let id = body.data.into_iter().next().and_then(|p| p.paper_id);
        debug!(found = id.is_some(), "title search complete");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn fetch_references(
        &self,
        paper_id: &str,
    ) -> Result<Vec<RemoteReference>, RemoteError> {
        let url = format!("{}/paper/{}/references", self.api_base, paper_id);
        let body: ReferencesResponse = self.get_json(&url, &[("fields", REFERENCE_FIELDS)]).await?;
        let refs = convert_references(body);
        debug!(n = refs.len(), "references fetched");
        Ok(refs)
    }
}

// ── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReferencesResponse {
    #[serde(default)]
    data: Option<Vec<ReferenceEdge>>,
}

#[derive(Debug, Deserialize)]
struct ReferenceEdge {
    #[serde(rename = "citedPaper")]
    cited_paper: Option<CitedPaper>,
}

#[derive(Debug, Deserialize)]
struct CitedPaper {
    title: Option<String>,
    #[serde(default)]
    authors: Option<Vec<AuthorRef>>,
    url: Option<String>,
    year: Option<i32>,
    #[serde(rename = "referenceCount")]
    reference_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AuthorRef {
    name: Option<String>,
}

/// Entries without a title carry nothing worth citing and are dropped.
fn convert_references(body: ReferencesResponse) -> Vec<RemoteReference> {
    body.data
        .unwrap_or_default()
        .into_iter()
        .filter_map(|edge| edge.cited_paper)
        .filter_map(|paper| {
            let title = paper.title.filter(|t| !t.trim().is_empty())?;
            Some(RemoteReference {
                title,
                authors: paper
                    .authors
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|a| a.name)
                    .collect(),
                year: paper.year,
                url: paper.url,
                reference_count: paper.reference_count,
            })
        })
        .collect()
}
