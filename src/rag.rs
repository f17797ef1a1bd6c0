//! Answer composition over retrieved chunks.
//!
//! The model is instructed to answer only from the provided context and to
//! say so when the context falls short, rather than improvising.

use crate::error::Result;
use crate::llm::{ChatClient, ChatMessage};
use crate::models::{SearchHit, SourceRef};

const ANSWER_TEMPERATURE: f32 = 0.4;
const ANSWER_MAX_TOKENS: u32 = 400;

/// Compose a natural-language answer from retrieval hits, returning the
/// answer text and the source attributions.
pub async fn make_answer(
    chat: &ChatClient,
    question: &str,
    hits: &[SearchHit],
) -> Result<(String, Vec<SourceRef>)> {
    let context_text = hits
        .iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "You are a helpful assistant.\n\
         Answer ONLY using the provided context. If the context is insufficient, \
         say so clearly, then provide the closest relevant info from the context.\n\n\
         Question: {}\n\n\
         Context:\n{}\n\n\
         Answer:\n",
        question, context_text
    );

    let messages = [
        ChatMessage::system("You are a knowledgeable assistant."),
        ChatMessage::user(prompt),
    ];

    let answer = chat
        .complete(&messages, ANSWER_TEMPERATURE, ANSWER_MAX_TOKENS)
        .await?;

    let sources = hits.iter().map(SourceRef::from).collect();
    Ok((answer, sources))
}
