//! `pharness ask` and `pharness chat`.
//!
//! `ask` answers one question and exits. `chat` is a REPL over stdin: one
//! session per REPL, so every turn sees the earlier exchanges. While an
//! answer streams, Ctrl-C cancels that answer and returns to the prompt; at
//! the prompt, Ctrl-C ends the chat.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::answer::{Answer, Answerer, AskOptions, CancelToken, Granularity};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::index::{index_path, validate_index_name, IndexTrust, VectorIndex};
use crate::llm::create_language_model;
use crate::memory::{SessionMemory, SessionStore};
use crate::retrieve::{format_passages, Retriever};

/// How answers are printed.
#[derive(Debug, Clone, Copy)]
pub struct Presentation {
    pub stream: Option<Granularity>,
    pub show_context: bool,
}

/// Load the named index and wire it to the configured embedder and model.
pub async fn open_answerer(config: &Config, index_name: Option<&str>) -> Result<Answerer> {
    let name = index_name.unwrap_or(&config.retrieval.index_name);
    validate_index_name(name)?;
    let path = index_path(&config.paths.index_dir, name);

    let embedder = create_embedder(&config.embedding)?;
    let index = VectorIndex::load(
        &path,
        IndexTrust::from_config(config.index.trust_on_load),
        embedder.model_name(),
    )
    .await?;
    let model = create_language_model(&config.llm)?;

    Ok(Answerer::new(Retriever::new(Arc::new(index), embedder), model))
}

async fn answer_once(
    answerer: &Answerer,
    question: &str,
    memory: &SessionMemory,
    options: &AskOptions,
    presentation: Presentation,
) -> Result<Answer> {
    let answer = match presentation.stream {
        None => {
            let answer = answerer.answer(question, memory, options).await?;
            println!("{}", answer.text);
            answer
        }
        Some(granularity) => {
            let cancel = CancelToken::new();
            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                })
            };
            let mut sink = |unit: &str| {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(unit.as_bytes());
                let _ = stdout.flush();
            };
            let result = answerer
                .answer_streaming(question, memory, options, granularity, &cancel, &mut sink)
                .await;
            watcher.abort();
            let answer = result?;
            println!();
            if answer.cancelled {
                println!("[cancelled]");
            }
            answer
        }
    };

    if presentation.show_context {
        if answer.retrieval_query != answer.question {
            println!("\nStepback question: {}", answer.retrieval_query);
        }
        println!("\nRetrieved context:\n{}", format_passages(&answer.passages));
    }
    Ok(answer)
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    index_name: Option<&str>,
    options: AskOptions,
    presentation: Presentation,
) -> Result<()> {
    let answerer = open_answerer(config, index_name).await?;
    let memory = SessionMemory::new();
    answer_once(&answerer, question, &memory, &options, presentation).await?;
    Ok(())
}

/// Next line from `lines`, or `None` at end of input or when `interrupt`
/// completes first.
async fn next_line<R, I>(lines: &mut Lines<R>, interrupt: I) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = interrupt => Ok(None),
    }
}

/// Resolves on Ctrl-C. Once a streamed answer has installed a SIGINT
/// listener the default handler no longer ends the process, so the prompt
/// listens too.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub async fn run_chat(
    config: &Config,
    index_name: Option<&str>,
    options: AskOptions,
    presentation: Presentation,
) -> Result<()> {
    let answerer = open_answerer(config, index_name).await?;
    let sessions = SessionStore::new();
    let (session, memory) = sessions.create();

    eprintln!(
        "chat on index '{}' ({} chunks), session {}. Type 'exit' to quit.",
        answerer.retriever().index().name(),
        answerer.retriever().index().len(),
        session
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();
        let Some(line) = next_line(&mut lines, ctrl_c()).await? else {
            eprintln!();
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        // A failed turn is reported and the conversation goes on.
        if let Err(e) = answer_once(&answerer, question, &memory, &options, presentation).await {
            eprintln!("Error: {:#}", e);
        }
    }

    sessions.end(session);
    Ok(())
}
