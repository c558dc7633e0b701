//! Library-level pipeline tests with fake embedding, language-model and
//! bibliographic-API capabilities.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tempfile::TempDir;

use paper_harness::answer::{Answerer, AskOptions};
use paper_harness::chunk::ChunkPolicy;
use paper_harness::embedding::Embedder;
use paper_harness::index::{build_index, index_path, BuildOutcome, IndexTrust, VectorIndex};
use paper_harness::index_cmd::collect_chunks;
use paper_harness::ingest::{discover_pdfs, ingest_all, ingest_document};
use paper_harness::llm::{LanguageModel, TextStream};
use paper_harness::memory::SessionStore;
use paper_harness::models::{ReferenceKind, RemoteReference};
use paper_harness::progress::NoProgress;
use paper_harness::references::{
    BibliographicApi, LocalStrategy, ReferenceChain, ReferenceInput, ReferenceStrategy,
    RemoteError, RemoteStrategy, Resolution,
};
use paper_harness::retrieve::Retriever;
use paper_harness::retry::{RetryPolicy, Sleeper};

mod common;
use common::{minimal_pdf, pdf_with_font_encoding};

struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

#[derive(Default)]
struct FakeScholar {
    searches: AtomicUsize,
}

#[async_trait]
impl BibliographicApi for FakeScholar {
    async fn search_paper_id(&self, title: &str) -> Result<Option<String>, RemoteError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok((title == "Attention Is All You Need").then(|| "p-1".to_string()))
    }

    async fn fetch_references(&self, _paper_id: &str) -> Result<Vec<RemoteReference>, RemoteError> {
        Ok(vec![RemoteReference {
            title: "Neural Machine Translation".to_string(),
            authors: vec!["D. Bahdanau".to_string()],
            year: Some(2014),
            url: None,
            reference_count: Some(30),
        }])
    }
}

/// Wraps a strategy and counts how often it runs.
struct Counting<S> {
    inner: S,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl<S: ReferenceStrategy> ReferenceStrategy for Counting<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn resolve(&self, input: &ReferenceInput<'_>) -> Resolution {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(input).await
    }
}

fn chain(api: Arc<FakeScholar>, local_runs: Arc<AtomicUsize>) -> ReferenceChain {
    ReferenceChain::new(vec![
        Box::new(RemoteStrategy::new(
            api,
            RetryPolicy::new(3, Duration::ZERO),
            Arc::new(NoSleep),
        )),
        Box::new(Counting {
            inner: LocalStrategy,
            runs: local_runs,
        }),
    ])
}

fn write(path: &Path, bytes: Vec<u8>) {
    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn remote_references_skip_local_extraction() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("attention.pdf");
    write(
        &pdf,
        minimal_pdf(
            &[&["Transformers."], &["References", "[1] Bahdanau, D. 2014."]],
            Some("Attention Is All You Need"),
        ),
    );

    let api = Arc::new(FakeScholar::default());
    let local_runs = Arc::new(AtomicUsize::new(0));
    let report = ingest_document(&pdf, &tmp.path().join("out"), &chain(api.clone(), local_runs.clone()))
        .await
        .unwrap();

    assert_eq!(report.references, Some(ReferenceKind::Remote));
    assert_eq!(local_runs.load(Ordering::SeqCst), 0);
    assert_eq!(api.searches.load(Ordering::SeqCst), 1);

    let folder = tmp.path().join("out/attention");
    assert!(!folder.join("references.txt").exists());
    let refs: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(folder.join("references.json")).unwrap()).unwrap();
    assert_eq!(refs[0]["title"], "Neural Machine Translation");
    assert_eq!(refs[0]["year"], 2014);
}

#[tokio::test]
async fn unmatched_title_falls_back_to_local() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("obscure.pdf");
    write(
        &pdf,
        minimal_pdf(
            &[&["Body."], &["References", "[1] Doe, A. 1999."]],
            Some("An Obscure Workshop Paper"),
        ),
    );

    let api = Arc::new(FakeScholar::default());
    let local_runs = Arc::new(AtomicUsize::new(0));
    let report = ingest_document(&pdf, &tmp.path().join("out"), &chain(api.clone(), local_runs.clone()))
        .await
        .unwrap();

    assert_eq!(report.references, Some(ReferenceKind::Local));
    assert_eq!(api.searches.load(Ordering::SeqCst), 1);
    assert_eq!(local_runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("out/obscure/references.txt")).unwrap(),
        "1. [1] Doe, A. 1999."
    );
}

#[tokio::test]
async fn unreadable_text_does_not_stop_the_batch() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("documents");
    std::fs::create_dir_all(&input).unwrap();
    // Sorted first, so a crash here would keep the good paper from running.
    write(
        &input.join("a_odd_font.pdf"),
        pdf_with_font_encoding(&[&["Unreadable."]], "BogusEncoding"),
    );
    write(
        &input.join("b_good.pdf"),
        minimal_pdf(&[&["Body."], &["References", "[1] Roe, B. 2001."]], None),
    );

    let pdfs = discover_pdfs(&input).unwrap();
    let summary = ingest_all(
        &pdfs,
        &tmp.path().join("out"),
        &ReferenceChain::local_only(),
        &NoProgress,
    )
    .await;

    assert_eq!(summary.processed + summary.failed, 2);
    let good = summary
        .reports
        .iter()
        .find(|r| r.filename == "b_good.pdf")
        .expect("good paper ingested");
    assert_eq!(good.references, Some(ReferenceKind::Local));
    assert!(tmp.path().join("out/b_good/references.txt").exists());

    // Indexing skips the unreadable paper and keeps the other.
    let chunks = collect_chunks(&pdfs, &ChunkPolicy::new(1000, 500).unwrap());
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.metadata.filename() == "b_good.pdf"));
}

/// Bag-of-keywords embedder; counts embedded texts.
#[derive(Default)]
struct KeywordEmbedder {
    embedded: AtomicUsize,
}

const KEYWORDS: [&str; 4] = ["graph", "protein", "language", "vision"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> Option<usize> {
        Some(KEYWORDS.len())
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|k| lower.matches(k).count() as f32 + 0.01)
                    .collect()
            })
            .collect())
    }
}

struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        // The first context line is enough to see what was retrieved.
        let context = prompt
            .split("<context>\n")
            .nth(1)
            .and_then(|rest| rest.lines().next())
            .unwrap_or("")
            .to_string();
        Ok(format!("Based on: {}", context))
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let full = self.complete(prompt).await?;
        Ok(stream::iter(vec![Ok(full)]).boxed())
    }
}

#[tokio::test]
async fn ingest_index_and_answer() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("documents");
    std::fs::create_dir_all(&input).unwrap();
    write(
        &input.join("graphs.pdf"),
        minimal_pdf(&[&["Graph neural networks on graph data [2, 4-5]."]], None),
    );
    write(
        &input.join("proteins.pdf"),
        minimal_pdf(&[&["Protein folding with protein language models [7]."]], None),
    );
    write(
        &input.join("vision.pdf"),
        minimal_pdf(&[&["Vision transformers for vision tasks."]], None),
    );

    let pdfs = discover_pdfs(&input).unwrap();
    let summary = ingest_all(
        &pdfs,
        &tmp.path().join("out"),
        &ReferenceChain::local_only(),
        &NoProgress,
    )
    .await;
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 0);

    let chunks = collect_chunks(&pdfs, &ChunkPolicy::new(1000, 500).unwrap());
    assert_eq!(chunks.len(), 3);

    let embedder = Arc::new(KeywordEmbedder::default());
    let path = index_path(&tmp.path().join("indexes"), "combined");
    let outcome = build_index(&path, &chunks, embedder.as_ref(), &NoProgress).await.unwrap();
    assert_eq!(outcome, BuildOutcome::Built { chunks: 3, documents: 3 });
    let embedded_by_build = embedder.embedded.load(Ordering::SeqCst);
    let bytes = std::fs::read(&path).unwrap();

    // A second build over the same corpus embeds nothing and leaves the file alone.
    let again = build_index(&path, &chunks, embedder.as_ref(), &NoProgress).await.unwrap();
    assert_eq!(again, BuildOutcome::Skipped);
    assert_eq!(embedder.embedded.load(Ordering::SeqCst), embedded_by_build);
    assert_eq!(std::fs::read(&path).unwrap(), bytes);

    let index = VectorIndex::load(&path, IndexTrust::Verify, "keywords").await.unwrap();
    let answerer = Answerer::new(Retriever::new(Arc::new(index), embedder.clone()), Arc::new(EchoModel));

    let sessions = SessionStore::new();
    let (_id, memory) = sessions.create();
    let options = AskOptions {
        top_k: 2,
        stepback: false,
    };

    let answer = answerer
        .answer("Which graph methods were compared?", &memory, &options)
        .await
        .unwrap();
    assert_eq!(answer.passages.len(), 2);
    assert_eq!(answer.passages[0].chunk.metadata.filename(), "graphs.pdf");
    assert_eq!(answer.passages[0].citation_refs_display(), "2, 4, 5");
    assert!(answer.text.starts_with("Based on: "));
    assert!(answer.text.contains("Graph neural networks"));

    let follow_up = answerer
        .answer("And for protein structure?", &memory, &options)
        .await
        .unwrap();
    assert_eq!(follow_up.passages[0].chunk.metadata.filename(), "proteins.pdf");
    assert_eq!(follow_up.passages[0].citation_refs_display(), "7");
    assert_eq!(memory.entries().await.len(), 2);

    // Another conversation starts with an empty memory.
    let (_other, other_memory) = sessions.create();
    assert!(other_memory.entries().await.is_empty());
}
