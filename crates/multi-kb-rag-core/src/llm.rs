//! Chat model trait and prompt templates.
//!
//! The engine talks to its LLM only through [`ChatModel::invoke`]: a single
//! prompt in, a single completion out. Both metadata extraction and answer
//! synthesis go through it.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Turn;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt` and return the model's text reply.
    async fn invoke(&self, prompt: &str) -> Result<String>;
}

/// Rewrites a follow-up into a standalone question.
/// Placeholders: `{chat_history}`, `{input}`.
pub const CONDENSE_QUESTION_TEMPLATE: &str = "\
Given the chat history and the latest user question, which might reference \
context in the chat history, formulate a standalone question that can be \
understood without the chat history. Do NOT answer the question, just \
reformulate it if needed and otherwise return it as is.

Chat history:
{chat_history}

Latest question: {input}

Standalone question:";

/// Grounded answer prompt. Placeholders: `{context}`, `{input}`.
pub const QA_TEMPLATE: &str = "\
You are a helpful assistant that answers questions using ONLY the context \
provided below. Do not use any outside knowledge. If the answer is not \
contained in the context, say politely that the provided documents do not \
contain the answer. Always answer in a polite and professional tone.

Context:
{context}

Question: {input}

Answer:";

/// Render prior turns as a `Human:` / `Assistant:` transcript.
pub fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("Human: {}\nAssistant: {}", t.question, t.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn condense_prompt(turns: &[Turn], question: &str) -> String {
    CONDENSE_QUESTION_TEMPLATE
        .replace("{chat_history}", &format_history(turns))
        .replace("{input}", question)
}

/// `context_blocks` are joined with blank lines.
pub fn qa_prompt(context_blocks: &[String], question: &str) -> String {
    QA_TEMPLATE
        .replace("{context}", &context_blocks.join("\n\n"))
        .replace("{input}", question)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_prompt_fills_both_placeholders() {
        let p = qa_prompt(
            &["Fee is 500 baht.".to_string(), "Other".to_string()],
            "What is the fee?",
        );
        assert!(p.contains("Fee is 500 baht.\n\nOther"));
        assert!(p.contains("Question: What is the fee?"));
        assert!(!p.contains("{context}"));
        assert!(!p.contains("{input}"));
    }

    #[test]
    fn condense_prompt_includes_history() {
        let turns = vec![Turn {
            question: "What is the fee?".into(),
            answer: "500 baht.".into(),
        }];
        let p = condense_prompt(&turns, "And for renewal?");
        assert!(p.contains("Human: What is the fee?\nAssistant: 500 baht."));
        assert!(p.contains("Latest question: And for renewal?"));
    }
}
