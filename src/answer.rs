//! Question answering over a vector index.
//!
//! One request walks a fixed sequence of states:
//!
//! ```text
//! Idle → [Reformulating] → Retrieving → Assembling → Generating → (Streaming) → Complete
//! ```
//!
//! - **Reformulating** only runs with `stepback` enabled. The stepback
//!   question drives retrieval; the user's question drives the answer.
//! - **Assembling** joins the passages in rank order into the context block
//!   and renders the session's earlier exchanges.
//! - **Generating** sends one fully rendered prompt to the language model.
//! - **Streaming** hands the answer to a sink one unit at a time and checks
//!   a [`CancelToken`] before each unit.
//!
//! The exchange is recorded in session memory only when the answer is
//! complete. A cancelled or failed request leaves memory untouched. Model
//! and embedding failures are not retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::llm::LanguageModel;
use crate::memory::{SessionMemory, Turn};
use crate::models::RetrievedPassage;
use crate::reformulate::stepback_question;
use crate::retrieve::Retriever;

const INSTRUCTIONS: &str = "You are a helpful assistant. Your task is to reply to user queries as completely and extensively as possible.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Reformulating,
    Retrieving,
    Assembling,
    Generating,
    Streaming,
    Complete,
}

/// Visited states of one request, in order.
#[derive(Debug, Clone)]
struct Transitions {
    visited: Vec<QueryState>,
}

impl Transitions {
    fn new() -> Self {
        Self {
            visited: vec![QueryState::Idle],
        }
    }

    fn enter(&mut self, next: QueryState) {
        let from = self.visited.last().copied().unwrap_or(QueryState::Idle);
        debug!(?from, to = ?next, "query state");
        self.visited.push(next);
    }
}

/// Unit handed to the sink while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// One character at a time.
    #[default]
    Char,
    /// Whatever the provider emitted in one piece.
    Fragment,
}

impl std::str::FromStr for Granularity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "char" => Ok(Granularity::Char),
            "fragment" => Ok(Granularity::Fragment),
            other => anyhow::bail!("unknown stream granularity '{}': use char or fragment", other),
        }
    }
}

/// Cooperative cancellation for a streaming answer. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AskOptions {
    pub top_k: usize,
    pub stepback: bool,
}

impl AskOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            stepback: config.stepback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub question: String,
    /// The text retrieval ran with: the stepback question when enabled.
    pub retrieval_query: String,
    pub text: String,
    pub passages: Vec<RetrievedPassage>,
    /// The stream was cancelled; `text` holds what was emitted before that.
    pub cancelled: bool,
    pub states: Vec<QueryState>,
}

/// Render the generation prompt. Plain string assembly; nothing in
/// `context`, `memory` or `question` is interpreted.
pub fn render_prompt(context: &str, memory: Option<&str>, question: &str) -> String {
    let mut prompt = String::with_capacity(context.len() + question.len() + 256);
    prompt.push_str(INSTRUCTIONS);
    prompt.push_str("\n<context>\n");
    prompt.push_str(context);
    prompt.push_str("\n</context>\n");
    if let Some(memory) = memory {
        prompt.push_str("<conversation>\n");
        prompt.push_str(memory);
        prompt.push_str("\n</conversation>\n");
    }
    prompt.push_str("New question: ");
    prompt.push_str(question);
    prompt.push('\n');
    prompt
}

/// Passage texts in rank order, separated by a blank line.
pub fn assemble_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| p.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

struct Prepared {
    retrieval_query: String,
    passages: Vec<RetrievedPassage>,
    prompt: String,
}

pub struct Answerer {
    retriever: Retriever,
    model: Arc<dyn LanguageModel>,
}

impl Answerer {
    pub fn new(retriever: Retriever, model: Arc<dyn LanguageModel>) -> Self {
        Self { retriever, model }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    async fn prepare(
        &self,
        question: &str,
        turn: &Turn<'_>,
        options: &AskOptions,
        states: &mut Transitions,
    ) -> Result<Prepared> {
        let retrieval_query = if options.stepback {
            states.enter(QueryState::Reformulating);
            stepback_question(self.model.as_ref(), question).await?
        } else {
            question.to_string()
        };

        states.enter(QueryState::Retrieving);
        let passages = self
            .retriever
            .retrieve(&retrieval_query, options.top_k)
            .await?;

        states.enter(QueryState::Assembling);
        let context = assemble_context(&passages);
        let memory = turn.render();
        let prompt = render_prompt(&context, memory.as_deref(), question);

        Ok(Prepared {
            retrieval_query,
            passages,
            prompt,
        })
    }

    /// Answer `question` in one piece.
    pub async fn answer(
        &self,
        question: &str,
        memory: &SessionMemory,
        options: &AskOptions,
    ) -> Result<Answer> {
        let mut states = Transitions::new();
        let mut turn = memory.begin_turn().await;
        let prepared = self.prepare(question, &turn, options, &mut states).await?;

        states.enter(QueryState::Generating);
        let text = self.model.complete(&prepared.prompt).await?;
        let text = text.trim().to_string();

        turn.record(question, &text);
        states.enter(QueryState::Complete);
        info!(passages = prepared.passages.len(), chars = text.len(), "answered");

        Ok(Answer {
            question: question.to_string(),
            retrieval_query: prepared.retrieval_query,
            text,
            passages: prepared.passages,
            cancelled: false,
            states: states.visited,
        })
    }

    /// Answer `question`, passing each unit of the answer to `sink` as it is
    /// produced. `cancel` is checked before every unit.
    pub async fn answer_streaming(
        &self,
        question: &str,
        memory: &SessionMemory,
        options: &AskOptions,
        granularity: Granularity,
        cancel: &CancelToken,
        sink: &mut (dyn FnMut(&str) + Send),
    ) -> Result<Answer> {
        let mut states = Transitions::new();
        let mut turn = memory.begin_turn().await;
        let prepared = self.prepare(question, &turn, options, &mut states).await?;

        states.enter(QueryState::Generating);
        let mut stream = self.model.complete_stream(&prepared.prompt).await?;

        states.enter(QueryState::Streaming);
        let mut text = String::new();
        let mut cancelled = false;
        'stream: while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            match granularity {
                Granularity::Fragment => {
                    if cancel.is_cancelled() {
                        cancelled = true;
                        break 'stream;
                    }
                    sink(&fragment);
                    text.push_str(&fragment);
                }
                Granularity::Char => {
                    for ch in fragment.chars() {
                        if cancel.is_cancelled() {
                            cancelled = true;
                            break 'stream;
                        }
                        let mut buf = [0u8; 4];
                        sink(ch.encode_utf8(&mut buf));
                        text.push(ch);
                    }
                }
            }
        }

        // The sink saw every unit as produced; the returned text is trimmed
        // like a non-streamed answer.
        let text = text.trim().to_string();
        if cancelled {
            info!(chars = text.len(), "answer stream cancelled");
        } else {
            turn.record(question, &text);
            states.enter(QueryState::Complete);
            info!(passages = prepared.passages.len(), chars = text.len(), "answer streamed");
        }

        Ok(Answer {
            question: question.to_string(),
            retrieval_query: prepared.retrieval_query,
            text,
            passages: prepared.passages,
            cancelled,
            states: states.visited,
        })
    }
}
