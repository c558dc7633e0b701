//! Reference resolution for one document.
//!
//! Resolution is an ordered list of [`ReferenceStrategy`] values. Each one
//! either resolves the document's references or defers to the next; the
//! first resolution wins and nothing after it runs. The default order is:
//!
//! | # | Strategy | Resolves when |
//! |---|----------|---------------|
//! | 1 | [`RemoteStrategy`] | The document has a usable title and the bibliographic API returns a non-empty list |
//! | 2 | [`LocalStrategy`] | The document text contains a reference section with at least one entry |
//!
//! A document for which every strategy defers has no references persisted.

pub mod locate;
pub mod normalize;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::{DocumentMetadata, References};
use crate::retry::{RetryPolicy, Sleeper};

pub use locate::locate_reference_section;
pub use normalize::{format_local_references, normalize_references};
pub use remote::{BibliographicApi, RemoteError, SemanticScholarClient};

/// What a strategy sees of a document.
pub struct ReferenceInput<'a> {
    pub metadata: &'a DocumentMetadata,
    /// Extracted text of each page, in page order.
    pub pages: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(References),
    Defer,
}

#[async_trait]
pub trait ReferenceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, input: &ReferenceInput<'_>) -> Resolution;
}

/// Title lookup against a [`BibliographicApi`], each call under a retry
/// policy. Exhausted retries defer instead of failing.
pub struct RemoteStrategy {
    api: Arc<dyn BibliographicApi>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RemoteStrategy {
    pub fn new(api: Arc<dyn BibliographicApi>, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            api,
            policy,
            sleeper,
        }
    }
}

#[async_trait]
impl ReferenceStrategy for RemoteStrategy {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn resolve(&self, input: &ReferenceInput<'_>) -> Resolution {
        let Some(title) = input.metadata.usable_title() else {
            debug!(filename = input.metadata.filename(), "no usable title, skipping remote lookup");
            return Resolution::Defer;
        };

        let api = &self.api;
        let paper_id = self
            .policy
            .run(self.sleeper.as_ref(), RemoteError::is_transient, move |_| {
                api.search_paper_id(title)
            })
            .await
            .flatten();
        let Some(paper_id) = paper_id else {
            return Resolution::Defer;
        };
        let paper_id = paper_id.as_str();

        let refs = self
            .policy
            .run(self.sleeper.as_ref(), RemoteError::is_transient, move |_| {
                api.fetch_references(paper_id)
            })
            .await;

        match refs {
            Some(refs) if !refs.is_empty() => Resolution::Resolved(References::Remote(refs)),
            _ => Resolution::Defer,
        }
    }
}

/// Reference-section location plus line segmentation over the document text.
pub struct LocalStrategy;

#[async_trait]
impl ReferenceStrategy for LocalStrategy {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn resolve(&self, input: &ReferenceInput<'_>) -> Resolution {
        let section = locate_reference_section(input.pages);
        let entries = normalize_references(&section);
        if entries.is_empty() {
            Resolution::Defer
        } else {
            Resolution::Resolved(References::Local(entries))
        }
    }
}

pub struct ReferenceChain {
    strategies: Vec<Box<dyn ReferenceStrategy>>,
}

impl ReferenceChain {
    pub fn new(strategies: Vec<Box<dyn ReferenceStrategy>>) -> Self {
        Self { strategies }
    }

    /// Remote lookup first, then the local section.
    pub fn remote_then_local(
        api: Arc<dyn BibliographicApi>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self::new(vec![
            Box::new(RemoteStrategy::new(api, policy, sleeper)),
            Box::new(LocalStrategy),
        ])
    }

    pub fn local_only() -> Self {
        Self::new(vec![Box::new(LocalStrategy)])
    }

    /// Run strategies in order until one resolves.
    pub async fn resolve(&self, input: &ReferenceInput<'_>) -> Option<References> {
        for strategy in &self.strategies {
            match strategy.resolve(input).await {
                Resolution::Resolved(refs) => {
                    info!(
                        filename = input.metadata.filename(),
                        strategy = strategy.name(),
                        entries = refs.len(),
                        "references resolved"
                    );
                    return Some(refs);
                }
                Resolution::Defer => {
                    debug!(strategy = strategy.name(), "strategy deferred");
                }
            }
        }
        info!(filename = input.metadata.filename(), "no references found");
        None
    }
}
