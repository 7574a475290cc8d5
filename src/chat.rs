//! Conversational retrieval over a session's index.
//!
//! Each ask runs the retrieval-augmented loop: rewrite the question into
//! standalone form when there is prior conversation, retrieve the most
//! similar chunks from the session's vector index, and have the chat model
//! answer from that context alone. History is held in memory per session
//! and bounded to the configured number of turns.

use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::llm::{create_model, ChatModel};
use crate::models::{ChatTurn, ScoredChunk};
use crate::prompts;
use crate::session::Session;

/// Returned when the model produces an empty completion.
pub const NO_ANSWER: &str = "no answer";

type History = Arc<Mutex<VecDeque<ChatTurn>>>;

struct HistoryEntry {
    last_used: u64,
    history: History,
}

/// In-memory conversation history, one bounded deque per session id.
///
/// The per-session mutex also serializes concurrent asks against the same
/// session, so interleaved requests cannot corrupt turn ordering. Distinct
/// sessions never contend. The registry itself is bounded to `max_sessions`
/// entries; when a new session would exceed the bound, the least recently
/// used conversation is evicted, so a long-running server does not
/// accumulate history for every session id it has ever seen.
pub struct HistoryStore {
    max_turns: usize,
    max_sessions: usize,
    sessions: Mutex<HashMap<String, HistoryEntry>>,
    clock: std::sync::atomic::AtomicU64,
}

impl HistoryStore {
    pub fn new(max_turns: usize, max_sessions: usize) -> Self {
        Self {
            max_turns,
            max_sessions,
            sessions: Mutex::new(HashMap::new()),
            clock: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn handle(&self, session_id: &str) -> History {
        let stamp = self
            .clock
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_used = stamp;
            return entry.history.clone();
        }

        if sessions.len() >= self.max_sessions {
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone())
            {
                sessions.remove(&oldest);
            }
        }

        let history: History = Arc::new(Mutex::new(VecDeque::new()));
        sessions.insert(
            session_id.to_string(),
            HistoryEntry {
                last_used: stamp,
                history: history.clone(),
            },
        );
        history
    }

    /// Drop a session's history, e.g. after its index is rebuilt or the
    /// session is purged.
    pub async fn remove(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    fn push_exchange(&self, history: &mut VecDeque<ChatTurn>, question: &str, answer: &str) {
        history.push_back(ChatTurn::user(question));
        history.push_back(ChatTurn::assistant(answer));
        while history.len() > self.max_turns {
            history.pop_front();
        }
    }
}

/// One answered question, with the retrieval evidence behind it.
#[derive(Debug)]
pub struct AskOutcome {
    pub answer: String,
    /// The standalone form actually used for retrieval. Equal to the input
    /// question on the first turn of a conversation.
    pub rewritten_question: String,
    pub sources: Vec<ScoredChunk>,
}

/// Drives the ask loop: owns the embedding provider, the chat model, and
/// the per-session histories.
pub struct ChatEngine {
    config: Config,
    provider: Box<dyn EmbeddingProvider>,
    model: Box<dyn ChatModel>,
    history: HistoryStore,
}

impl ChatEngine {
    pub fn new(config: Config) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        let model = create_model(&config.llm)?;
        let history = HistoryStore::new(config.chat.max_turns, config.chat.max_sessions);
        Ok(Self {
            config,
            provider,
            model,
            history,
        })
    }

    /// Build with injected provider and model. Used by tests to run the
    /// full loop offline.
    pub fn with_components(
        config: Config,
        provider: Box<dyn EmbeddingProvider>,
        model: Box<dyn ChatModel>,
    ) -> Self {
        let history = HistoryStore::new(config.chat.max_turns, config.chat.max_sessions);
        Self {
            config,
            provider,
            model,
            history,
        }
    }

    pub async fn forget(&self, session_id: &str) {
        self.history.remove(session_id).await;
    }

    /// Answer `question` against `session`'s index.
    ///
    /// Fails with [`crate::index::IndexError::NotFound`] (downcastable from
    /// the returned error) when the session has never been ingested.
    pub async fn ask(
        &self,
        session: &Session,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<AskOutcome> {
        let index = VectorIndex::open(&session.index_dir).await?;
        let k = top_k.unwrap_or(self.config.retrieval.top_k);

        let handle = self.history.handle(&session.id).await;
        let mut history = handle.lock().await;
        let prior: Vec<ChatTurn> = history.iter().cloned().collect();

        let rewritten = self.rewrite(&prior, question).await?;

        let sources = index
            .query(self.provider.as_ref(), &self.config.embedding, &rewritten, k)
            .await
            .context("retrieval failed")?;

        let context: String = sources
            .iter()
            .map(|s| s.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = prompts::grounded_answer(&context, &prior, &rewritten);
        let raw = self.model.complete(&messages).await?;
        let answer = match raw.trim() {
            "" => NO_ANSWER.to_string(),
            trimmed => trimmed.to_string(),
        };

        self.history.push_exchange(&mut history, question, &answer);
        index.close().await;

        Ok(AskOutcome {
            answer,
            rewritten_question: rewritten,
            sources,
        })
    }

    /// First turn of a conversation has nothing to resolve against, so the
    /// question passes through without an LLM call.
    async fn rewrite(&self, history: &[ChatTurn], question: &str) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }
        let messages = prompts::rewrite_question(history, question);
        let rewritten = self.model.complete(&messages).await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_text;
    use crate::config::{
        ChatConfig, ChunkingConfig, EmbeddingConfig, LlmConfig, RetrievalConfig, ServerConfig,
        StorageConfig,
    };
    use crate::index::{IndexError, IngestMode};
    use crate::llm::ScriptedModel;
    use crate::session::SessionStore;
    use tempfile::TempDir;

    fn test_config(root: &std::path::Path) -> Config {
        Config {
            storage: StorageConfig {
                root: root.to_path_buf(),
                keep_latest: 10,
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                dims: Some(32),
                ..EmbeddingConfig::default()
            },
            llm: LlmConfig::default(),
            chat: ChatConfig::default(),
            server: ServerConfig::default(),
        }
    }

    async fn seeded_session(config: &Config) -> (SessionStore, Session) {
        let store = SessionStore::new(config.storage.root.clone()).unwrap();
        let session = store.resolve(None).unwrap();
        let provider = create_provider(&config.embedding).unwrap();
        let chunks = split_text(
            "notes.txt",
            "The launch is scheduled for March. The budget is four million dollars.",
            1000,
            0,
        )
        .unwrap();
        VectorIndex::build(
            &session.index_dir,
            &chunks,
            provider.as_ref(),
            &config.embedding,
            IngestMode::Replace,
        )
        .await
        .unwrap()
        .close()
        .await;
        (store, session)
    }

    #[tokio::test]
    async fn first_ask_skips_rewrite_second_rewrites() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let (_store, session) = seeded_session(&config).await;

        let model = Arc::new(ScriptedModel::new(vec![
            "The launch is in March.",
            "What is the launch budget?",
            "Four million dollars.",
        ]));
        let provider = create_provider(&config.embedding).unwrap();
        let engine = ChatEngine::with_components(config, provider, Box::new(model.clone()));

        let first = engine
            .ask(&session, "When is the launch?", None)
            .await
            .unwrap();
        assert_eq!(first.rewritten_question, "When is the launch?");
        assert_eq!(first.answer, "The launch is in March.");

        let second = engine
            .ask(&session, "And its budget?", None)
            .await
            .unwrap();
        assert_eq!(second.rewritten_question, "What is the launch budget?");
        assert_eq!(second.answer, "Four million dollars.");

        // Call 1: grounded answer. Call 2: rewrite (history present).
        // Call 3: grounded answer with the rewritten question.
        let calls = model.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1][0].content.contains("standalone"));
        assert_eq!(
            calls[2].last().unwrap().content,
            "What is the launch budget?"
        );
    }

    #[tokio::test]
    async fn empty_completion_becomes_no_answer() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let (_store, session) = seeded_session(&config).await;

        let model = ScriptedModel::new(vec!["   "]);
        let provider = create_provider(&config.embedding).unwrap();
        let engine = ChatEngine::with_components(config, provider, Box::new(model));

        let outcome = engine.ask(&session, "Anything?", None).await.unwrap();
        assert_eq!(outcome.answer, NO_ANSWER);
    }

    #[tokio::test]
    async fn ask_without_index_fails_not_found() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let store = SessionStore::new(config.storage.root.clone()).unwrap();
        let session = store.resolve(None).unwrap();

        let provider = create_provider(&config.embedding).unwrap();
        let engine = ChatEngine::with_components(
            config,
            provider,
            Box::new(ScriptedModel::new(vec!["unused"])),
        );

        let err = engine.ask(&session, "Hello?", None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_is_bounded_and_forgettable() {
        let store = HistoryStore::new(4, 8);
        let handle = store.handle("s1").await;
        {
            let mut history = handle.lock().await;
            for i in 0..5 {
                let q = format!("q{i}");
                let a = format!("a{i}");
                store.push_exchange(&mut history, &q, &a);
            }
            assert_eq!(history.len(), 4);
            assert_eq!(history[0].content, "q3");
        }

        store.remove("s1").await;
        let fresh = store.handle("s1").await;
        assert!(fresh.lock().await.is_empty());
    }

    #[tokio::test]
    async fn registry_evicts_least_recently_used_session() {
        let store = HistoryStore::new(4, 2);

        store
            .handle("s1")
            .await
            .lock()
            .await
            .push_back(ChatTurn::user("kept"));
        store
            .handle("s2")
            .await
            .lock()
            .await
            .push_back(ChatTurn::user("evicted"));

        // Touch s1 so s2 becomes the least recently used, then exceed the
        // bound with a third session.
        store.handle("s1").await;
        store.handle("s3").await;

        assert_eq!(store.handle("s1").await.lock().await.len(), 1);
        // s2 was evicted; asking for it again yields a fresh conversation.
        assert!(store.handle("s2").await.lock().await.is_empty());
    }

    #[tokio::test]
    async fn sources_ranked_and_limited() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let (_store, session) = seeded_session(&config).await;

        let provider = create_provider(&config.embedding).unwrap();
        let engine = ChatEngine::with_components(
            config,
            provider,
            Box::new(ScriptedModel::new(vec!["March."])),
        );

        let outcome = engine
            .ask(&session, "When is the launch?", Some(1))
            .await
            .unwrap();
        assert_eq!(outcome.sources.len(), 1);
    }
}
