//! Stepback query reformulation.
//!
//! A specific question ("What learning rate did the ResNet-50 baseline use
//! in Table 3?") often retrieves worse than a broader one ("How are ResNet
//! baselines trained?"). The language model is asked for that broader
//! question, which then drives retrieval; the original question still drives
//! the answer.

use anyhow::Result;
use tracing::{debug, warn};

use crate::llm::LanguageModel;

/// Build the reformulation prompt for `question`.
pub fn stepback_prompt(question: &str) -> String {
    format!(
        "You are an expert at world knowledge. Your task is to step back and paraphrase a question \
         into a more generic step-back question that is easier to answer.\n\
         Do not change, expand or translate any term, name or acronym you do not recognize; \
         copy it exactly as written.\n\
         Reply with the step-back question only.\n\n\
         Original question: {}\n\
         Step-back question:",
        question
    )
}

/// Ask `model` for a stepback version of `question`.
///
/// An empty reply falls back to the original question. A failed model call
/// is returned as an error.
pub async fn stepback_question(model: &dyn LanguageModel, question: &str) -> Result<String> {
    let reply = model.complete(&stepback_prompt(question)).await?;
    let reply = clean_reply(&reply);
    if reply.is_empty() {
        warn!("stepback reformulation was empty, using the original question");
        return Ok(question.to_string());
    }
    debug!(original = question, stepback = %reply, "reformulated query");
    Ok(reply)
}

/// First non-empty line, without a leading label or surrounding quotes.
fn clean_reply(reply: &str) -> String {
    let line = reply
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let line = line
        .strip_prefix("Step-back question:")
        .map(str::trim)
        .unwrap_or(line);
    line.trim_matches('"').trim().to_string()
}
