//! Conversation manager.
//!
//! Keeps a bounded, ordered history of turns for one chat session and
//! enforces at most one in-flight exchange:
//!
//! ```text
//!            submit()                     complete() / abort()
//!   Idle ───────────────▶ AwaitingResponse ───────────────────▶ Idle
//!                              │ submit() → ConversationBusy
//! ```
//!
//! [`ConversationManager::submit`] retrieves context and assembles a
//! [`Prompt`] (system preamble + context, retained history, new question).
//! [`ConversationManager::complete`] records the exchange and evicts the
//! oldest turns until the history fits both `max_turns` and the optional
//! token budget. [`ConversationManager::abort`] drops the pending exchange
//! without touching history, which is how failed turns are unwound.

use std::collections::VecDeque;

use crate::config::ConversationConfig;
use crate::error::{RagError, Result};
use crate::models::{ConversationTurn, RetrievedChunk, Role};
use crate::retriever::Retriever;

/// Rough characters-per-token ratio for the history budget.
const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_PREAMBLE: &str = "You are Astro Bot, a cheerful and curious research companion. \
Answer the user's question using the context passages below when they are relevant, and say \
plainly when they do not contain the answer. Keep answers to about 100 words.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// A fully assembled request for the completion endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
}

pub struct ConversationManager {
    preamble: String,
    top_k: usize,
    max_turns: usize,
    max_history_tokens: Option<usize>,
    history: VecDeque<ConversationTurn>,
    pending: Option<ConversationTurn>,
}

impl ConversationManager {
    pub fn new(config: &ConversationConfig, top_k: usize, preamble: Option<String>) -> Self {
        Self {
            preamble: preamble.unwrap_or_else(|| DEFAULT_PREAMBLE.to_string()),
            top_k,
            max_turns: config.max_turns.max(1),
            max_history_tokens: config.max_history_tokens,
            history: VecDeque::new(),
            pending: None,
        }
    }

    pub fn state(&self) -> ConversationState {
        if self.pending.is_some() {
            ConversationState::AwaitingResponse
        } else {
            ConversationState::Idle
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Forget all completed turns. A pending exchange is unaffected.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Start an exchange: Idle → AwaitingResponse.
    pub fn begin(&mut self, user_text: &str) -> Result<()> {
        if self.pending.is_some() {
            return Err(RagError::ConversationBusy);
        }
        self.pending = Some(ConversationTurn::new(Role::User, user_text));
        Ok(())
    }

    /// Start an exchange, retrieve context for it, and build the prompt.
    ///
    /// If retrieval fails the exchange is dropped and the state returns to
    /// Idle before the error is returned.
    pub async fn submit(&mut self, retriever: &Retriever, user_text: &str) -> Result<Prompt> {
        self.begin(user_text)?;
        match retriever.retrieve(user_text, self.top_k).await {
            Ok(context) => Ok(self.build_prompt(&context, user_text)),
            Err(e) => {
                self.pending = None;
                Err(e)
            }
        }
    }

    /// Record the assistant's answer to the pending exchange.
    pub fn complete(&mut self, assistant_text: &str) -> Result<()> {
        let user_turn = self.pending.take().ok_or(RagError::NoPendingExchange)?;
        self.history.push_back(user_turn);
        self.history
            .push_back(ConversationTurn::new(Role::Assistant, assistant_text));
        self.trim();
        Ok(())
    }

    /// Drop the pending exchange, if any. Returns whether one was pending.
    pub fn abort(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn build_prompt(&self, context: &[RetrievedChunk], user_text: &str) -> Prompt {
        let mut system = self.preamble.clone();
        system.push_str("\n\nContext:\n");
        if context.is_empty() {
            system.push_str("(no stored passages matched this question)");
        }
        for (i, hit) in context.iter().enumerate() {
            if i > 0 {
                system.push_str("\n\n");
            }
            system.push_str(&format!("[{}] {}\n{}", i + 1, hit.source.title, hit.text.trim()));
        }

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(PromptMessage {
            role: Role::System,
            content: system,
        });
        messages.extend(self.history.iter().map(|turn| PromptMessage {
            role: turn.role,
            content: turn.text.clone(),
        }));
        messages.push(PromptMessage {
            role: Role::User,
            content: user_text.to_string(),
        });

        Prompt { messages }
    }

    fn history_tokens(&self) -> usize {
        self.history
            .iter()
            .map(|t| t.text.chars().count().div_ceil(CHARS_PER_TOKEN))
            .sum()
    }

    fn trim(&mut self) {
        while self.history.len() > self.max_turns {
            self.history.pop_front();
        }
        if let Some(budget) = self.max_history_tokens {
            while !self.history.is_empty() && self.history_tokens() > budget {
                self.history.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_id, text_hash};
    use crate::embedding::EmbeddingProvider;
    use crate::models::{Chunk, IndexEntry, SourceMetadata};
    use crate::store::{DistanceMetric, VectorStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Returns a fixed vector, or fails when built with `None`.
    struct FixedEmbedder(Option<Vec<f32>>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            match &self.0 {
                Some(v) => Ok(texts.iter().map(|_| v.clone()).collect()),
                None => Err(RagError::EndpointTimeout {
                    endpoint: "http://127.0.0.1:11434/api/embed".to_string(),
                    timeout: std::time::Duration::from_secs(1),
                }),
            }
        }
    }

    fn retriever(embedding: Option<Vec<f32>>) -> Retriever {
        let store = Arc::new(VectorStore::in_memory(DistanceMetric::Cosine));
        let text = "Pulsars emit beams of radiation.";
        store
            .upsert(vec![IndexEntry {
                chunk: Chunk {
                    id: chunk_id("d1", 0),
                    document_id: "d1".to_string(),
                    chunk_index: 0,
                    start: 0,
                    end: text.chars().count(),
                    text: text.to_string(),
                    hash: text_hash(text),
                },
                embedding: vec![1.0, 0.0],
                source: SourceMetadata {
                    document_id: "d1".to_string(),
                    source: PathBuf::from("/papers/pulsars.txt"),
                    title: "pulsars.txt".to_string(),
                    content_type: "text/plain".to_string(),
                    modified_at: Utc::now(),
                },
                model: "fixed".to_string(),
            }])
            .unwrap();
        Retriever::new(store, Arc::new(FixedEmbedder(embedding)))
    }

    fn manager(max_turns: usize, max_history_tokens: Option<usize>) -> ConversationManager {
        ConversationManager::new(
            &ConversationConfig {
                max_turns,
                max_history_tokens,
            },
            4,
            None,
        )
    }

    fn exchange(conv: &mut ConversationManager, q: &str, a: &str) {
        conv.begin(q).unwrap();
        conv.complete(a).unwrap();
    }

    #[test]
    fn test_state_transitions() {
        let mut conv = manager(10, None);
        assert_eq!(conv.state(), ConversationState::Idle);
        conv.begin("hello").unwrap();
        assert_eq!(conv.state(), ConversationState::AwaitingResponse);
        conv.complete("hi there").unwrap();
        assert_eq!(conv.state(), ConversationState::Idle);
        let roles: Vec<Role> = conv.history().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn test_second_begin_while_awaiting_is_busy() {
        let mut conv = manager(10, None);
        exchange(&mut conv, "first", "answer");
        conv.begin("second").unwrap();
        let err = conv.begin("third").unwrap_err();
        assert!(matches!(err, RagError::ConversationBusy));
        assert_eq!(conv.history_len(), 2);
        assert_eq!(conv.state(), ConversationState::AwaitingResponse);
    }

    #[tokio::test]
    async fn test_submit_while_awaiting_is_busy() {
        let online = retriever(Some(vec![1.0, 0.0]));
        let mut conv = manager(10, None);
        exchange(&mut conv, "first", "answer");

        let prompt = conv.submit(&online, "what is a pulsar?").await.unwrap();
        assert!(prompt.messages[0].content.contains("[1] pulsars.txt"));
        let err = conv.submit(&online, "and a magnetar?").await.unwrap_err();

        assert!(matches!(err, RagError::ConversationBusy));
        assert_eq!(conv.state(), ConversationState::AwaitingResponse);
        let texts: Vec<&str> = conv.history().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "answer"]);
    }

    #[tokio::test]
    async fn test_failed_retrieval_in_submit_returns_to_idle() {
        let offline = retriever(None);
        let mut conv = manager(10, None);
        exchange(&mut conv, "first", "answer");

        let err = conv.submit(&offline, "what is a pulsar?").await.unwrap_err();

        assert!(matches!(err, RagError::EndpointTimeout { .. }), "{err:?}");
        assert_eq!(conv.state(), ConversationState::Idle);
        assert_eq!(conv.history_len(), 2);
        // The next submit is accepted.
        let online = retriever(Some(vec![1.0, 0.0]));
        assert!(conv.submit(&online, "try again").await.is_ok());
    }

    #[test]
    fn test_abort_appends_nothing() {
        let mut conv = manager(10, None);
        conv.begin("will fail").unwrap();
        assert!(conv.abort());
        assert_eq!(conv.state(), ConversationState::Idle);
        assert_eq!(conv.history_len(), 0);
        assert!(!conv.abort());
    }

    #[test]
    fn test_complete_without_pending() {
        let mut conv = manager(10, None);
        assert!(matches!(conv.complete("x").unwrap_err(), RagError::NoPendingExchange));
    }

    #[test]
    fn test_history_bound_evicts_oldest() {
        let mut conv = manager(4, None);
        for i in 0..10 {
            exchange(&mut conv, &format!("q{}", i), &format!("a{}", i));
            assert!(conv.history_len() <= 4);
        }
        let texts: Vec<&str> = conv.history().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["q8", "a8", "q9", "a9"]);
    }

    #[test]
    fn test_odd_bound_keeps_most_recent_turns() {
        let mut conv = manager(3, None);
        exchange(&mut conv, "q0", "a0");
        exchange(&mut conv, "q1", "a1");
        let texts: Vec<&str> = conv.history().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a0", "q1", "a1"]);
    }

    #[test]
    fn test_token_budget() {
        // Each 8-char turn costs 2 tokens; budget allows 3 turns.
        let mut conv = manager(100, Some(6));
        for i in 0..5 {
            exchange(&mut conv, &format!("question{}", i)[..8], &format!("answer_{}", i));
            assert!(conv.history_tokens() <= 6);
        }
        assert_eq!(conv.history_len(), 3);
        assert_eq!(conv.history().last().unwrap().text, "answer_4");
    }

    #[test]
    fn test_prompt_layout() {
        let mut conv = manager(10, None);
        exchange(&mut conv, "What is a pulsar?", "A rotating neutron star.");
        let context = vec![RetrievedChunk {
            chunk_id: "c1".to_string(),
            text: "Pulsars emit beams of radiation.".to_string(),
            distance: 0.1,
            source: SourceMetadata {
                document_id: "d1".to_string(),
                source: PathBuf::from("/papers/pulsars.txt"),
                title: "pulsars.txt".to_string(),
                content_type: "text/plain".to_string(),
                modified_at: Utc::now(),
            },
        }];

        let prompt = conv.build_prompt(&context, "How fast do they spin?");
        assert_eq!(prompt.messages.len(), 4);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert!(prompt.messages[0].content.starts_with("You are Astro Bot"));
        assert!(prompt.messages[0]
            .content
            .contains("[1] pulsars.txt\nPulsars emit beams of radiation."));
        assert_eq!(prompt.messages[1].content, "What is a pulsar?");
        assert_eq!(prompt.messages[2].role, Role::Assistant);
        assert_eq!(prompt.messages[3].content, "How fast do they spin?");
    }

    #[test]
    fn test_prompt_without_context() {
        let conv = manager(10, None);
        let prompt = conv.build_prompt(&[], "hello");
        assert!(prompt.messages[0].content.contains("no stored passages"));
        assert_eq!(prompt.messages.len(), 2);
    }

    #[test]
    fn test_clear_history() {
        let mut conv = manager(10, None);
        exchange(&mut conv, "q", "a");
        conv.clear();
        assert_eq!(conv.history_len(), 0);
    }
}
