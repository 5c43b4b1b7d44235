//! The question-to-answer pipeline.
//!
//! # Flow
//!
//! 1. Validate the question
//! 2. Authorize the chat, or create one lazily when no id is given
//! 3. Persist the user message (fatal on failure)
//! 4. Embed the question
//! 5. Retrieve the top-K matches
//! 6. Assemble context and sources, render the prompt
//! 7. Stream the answer into the caller's sink
//! 8. Queue the assistant message for background persistence
//!
//! Steps 4, 5 and the opening of step 7 go through the shared retry
//! policy. Once deltas flow nothing is retried.

use std::sync::Arc;

use ragline_config::RagConfig;
use ragline_core::error::{Error, Result};
use ragline_core::message::{Chat, ChatId, UserId};
use ragline_core::sink::{AnswerSink, PipelineStage};
use ragline_providers::{EmbeddingClient, RagClients, StreamingCompletionClient, VectorRetriever};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

use crate::auth::AuthorizationGate;
use crate::context::ContextAssembler;
use crate::persistence::PersistenceSink;
use crate::prompt::PromptBuilder;
use crate::sources::SourceExtractor;
use crate::stream_event::{ChannelSink, StreamEvent};

/// Chat titles are the question cut to this many characters.
const TITLE_MAX_CHARS: usize = 50;

/// Buffered events between a spawned run and its consumer.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub context_max_tokens: usize,
    pub enable_sources: bool,
    pub max_sources: usize,
    pub response_language: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&RagConfig::default())
    }
}

impl From<&RagConfig> for PipelineSettings {
    fn from(rag: &RagConfig) -> Self {
        Self {
            top_k: rag.top_k,
            context_max_tokens: rag.context_max_tokens,
            enable_sources: rag.enable_sources,
            max_sources: rag.max_sources,
            response_language: rag.response_language.clone(),
        }
    }
}

pub struct RagPipeline {
    gate: AuthorizationGate,
    persistence: Arc<PersistenceSink>,
    embedding: EmbeddingClient,
    retriever: VectorRetriever,
    completion: StreamingCompletionClient,
    assembler: ContextAssembler,
    prompts: PromptBuilder,
    sources: SourceExtractor,
    top_k: usize,
    span: Span,
}

impl RagPipeline {
    pub fn new(clients: RagClients, persistence: Arc<PersistenceSink>, settings: PipelineSettings) -> Self {
        Self {
            gate: AuthorizationGate::new(persistence.store().clone()),
            persistence,
            embedding: clients.embedding,
            retriever: clients.retriever,
            completion: clients.completion,
            assembler: ContextAssembler::new(settings.context_max_tokens),
            prompts: PromptBuilder::new(settings.response_language),
            sources: SourceExtractor::new(settings.enable_sources, settings.max_sources),
            top_k: settings.top_k,
            span: tracing::info_span!("rag_pipeline"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn persistence(&self) -> &Arc<PersistenceSink> {
        &self.persistence
    }

    /// Answer `question` in `chat_id` (or a new chat) for `user_id`,
    /// streaming into `sink`. Returns the chat the exchange belongs to.
    pub async fn stream_answer(
        &self,
        cancel: &CancellationToken,
        user_id: &UserId,
        chat_id: Option<&ChatId>,
        question: &str,
        sink: &mut dyn AnswerSink,
    ) -> Result<Chat> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::Validation("question must not be empty".into()));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        async {
            let (chat, created) = match chat_id {
                Some(id) => (self.gate.authorize(user_id, id).await?, false),
                None => {
                    let chat = self
                        .persistence
                        .create_chat(user_id, &chat_title(question))
                        .await?;
                    (chat, true)
                }
            };
            if let Err(e) = self.persistence.save_user_message(&chat.id, question).await {
                // A new chat without its first question is not kept
                if created {
                    self.persistence.discard_chat(&chat.id).await;
                }
                return Err(e);
            }

            sink.on_status(PipelineStage::Understanding).await;
            let embedding = self.embedding.create_embedding(cancel, question).await?;

            sink.on_status(PipelineStage::Searching).await;
            let matches = self
                .retriever
                .query_similar(cancel, &embedding, self.top_k)
                .await?;

            let context = self.assembler.build_context(&matches);
            let sources = self.sources.extract(&context.entries);
            let prompt = self
                .prompts
                .build_prompt(&context.serialized, question, &context.entries);
            debug!(
                matches = matches.len(),
                entries = context.entries.len(),
                dropped = context.dropped,
                prompt_len = prompt.len(),
                "Prompt ready"
            );

            sink.on_status(PipelineStage::Thinking).await;
            let answer = self
                .completion
                .stream_chat_response(cancel, &prompt, &sources, sink)
                .await?;

            if answer.trim().is_empty() {
                warn!(chat_id = %chat.id, "Empty answer; nothing to persist");
            } else {
                self.persistence.save_assistant_message(&chat.id, &answer).await;
            }

            info!(
                chat_id = %chat.id,
                sources = sources.len(),
                answer_len = answer.len(),
                "Answer streamed"
            );
            Ok(chat)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Run [`stream_answer`](Self::stream_answer) on its own task and
    /// expose the callbacks as one event stream ending in `Done` or `Error`.
    ///
    /// Dropping the receiver stops the run at the next delta.
    pub fn spawn_stream(
        self: &Arc<Self>,
        cancel: CancellationToken,
        user_id: UserId,
        chat_id: Option<ChatId>,
        question: String,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pipeline = Arc::clone(self);

        tokio::spawn(async move {
            let mut sink = ChannelSink::new(tx.clone());
            let result = pipeline
                .stream_answer(&cancel, &user_id, chat_id.as_ref(), &question, &mut sink)
                .await;

            let last = match result {
                Ok(chat) => StreamEvent::Done {
                    chat_id: chat.id.to_string(),
                },
                Err(e) => {
                    warn!(user_id = %user_id, kind = ?e.kind(), error = %e, "Stream run failed");
                    StreamEvent::from_error(&e)
                }
            };
            // Receiver may already be gone
            let _ = tx.send(last).await;
        });

        rx
    }
}

/// Trimmed question, cut to 50 characters plus `...` when longer.
pub fn chat_title(question: &str) -> String {
    let trimmed = question.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    title.push_str("...");
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::QueueSettings;
    use crate::test_helpers::*;
    use ragline_core::error::{ProviderError, StoreError};
    use ragline_core::event::EventBus;
    use ragline_core::message::Message;
    use ragline_core::message::MessageKind;
    use ragline_core::store::ChatStore;
    use ragline_store::InMemoryChatStore;

    struct Fixture {
        pipeline: RagPipeline,
        store: Arc<InMemoryChatStore>,
        embedder: Arc<MockEmbedder>,
        vectors: Arc<MockVectorStore>,
        completer: Arc<MockCompleter>,
    }

    fn fixture_with(completer: MockCompleter, embedder: MockEmbedder) -> Fixture {
        let config = fast_config();
        let store = Arc::new(InMemoryChatStore::new());
        let embedder = Arc::new(embedder);
        let vectors = Arc::new(MockVectorStore::new(vec![
            scored("v1", 0.9, "Metoprolol_Drug_information.md", "50 mg twice daily"),
            scored("v2", 0.7, "Beta_blockers.md", "Start low"),
        ]));
        let completer = Arc::new(completer);

        let clients = RagClients::with_parts(&config, embedder.clone(), vectors.clone(), completer.clone());
        let persistence = Arc::new(PersistenceSink::new(
            store.clone(),
            Arc::new(EventBus::default()),
            QueueSettings::default(),
        ));
        let pipeline = RagPipeline::new(clients, persistence, PipelineSettings::from(&config.rag));

        Fixture {
            pipeline,
            store,
            embedder,
            vectors,
            completer,
        }
    }

    /// Chats work; every message append fails.
    struct NoAppendStore {
        inner: InMemoryChatStore,
    }

    #[async_trait::async_trait]
    impl ChatStore for NoAppendStore {
        fn name(&self) -> &str {
            "no_append"
        }
        async fn create_chat(&self, chat: Chat) -> std::result::Result<Chat, StoreError> {
            self.inner.create_chat(chat).await
        }
        async fn find_chat(&self, id: &ChatId) -> std::result::Result<Option<Chat>, StoreError> {
            self.inner.find_chat(id).await
        }
        async fn list_chats(&self, user_id: &UserId) -> std::result::Result<Vec<Chat>, StoreError> {
            self.inner.list_chats(user_id).await
        }
        async fn touch_chat(&self, id: &ChatId) -> std::result::Result<(), StoreError> {
            self.inner.touch_chat(id).await
        }
        async fn delete_chat(&self, id: &ChatId) -> std::result::Result<bool, StoreError> {
            self.inner.delete_chat(id).await
        }
        async fn append_message(&self, _message: Message) -> std::result::Result<(), StoreError> {
            Err(StoreError::Storage("disk full".into()))
        }
        async fn list_messages(&self, chat_id: &ChatId) -> std::result::Result<Vec<Message>, StoreError> {
            self.inner.list_messages(chat_id).await
        }
    }

    fn fixture(deltas: &[&str]) -> Fixture {
        fixture_with(MockCompleter::new(deltas), MockEmbedder::new(vec![0.1, 0.2]))
    }

    #[tokio::test]
    async fn failed_first_save_leaves_no_empty_chat() {
        let config = fast_config();
        let store = Arc::new(NoAppendStore {
            inner: InMemoryChatStore::new(),
        });
        let embedder = Arc::new(MockEmbedder::new(vec![0.1, 0.2]));
        let completer = Arc::new(MockCompleter::new(&["unused"]));
        let clients = RagClients::with_parts(
            &config,
            embedder.clone(),
            Arc::new(MockVectorStore::new(vec![])),
            completer.clone(),
        );
        let persistence = Arc::new(PersistenceSink::new(
            store.clone(),
            Arc::new(EventBus::default()),
            QueueSettings::default(),
        ));
        let pipeline = RagPipeline::new(clients, persistence, PipelineSettings::from(&config.rag));
        let alice = UserId::from("alice");

        let err = pipeline
            .stream_answer(
                &CancellationToken::new(),
                &alice,
                None,
                "What is the standard dosage for metoprolol?",
                &mut RecordingSink::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Store(_)));
        assert!(store.list_chats(&alice).await.unwrap().is_empty());
        assert_eq!(embedder.calls(), 0);
        assert_eq!(completer.calls(), 0);
    }

    #[tokio::test]
    async fn failed_save_keeps_existing_chat() {
        let store = Arc::new(NoAppendStore {
            inner: InMemoryChatStore::new(),
        });
        let alice = UserId::from("alice");
        let chat = store
            .create_chat(Chat::new(alice.clone(), "existing"))
            .await
            .unwrap();

        let config = fast_config();
        let clients = RagClients::with_parts(
            &config,
            Arc::new(MockEmbedder::new(vec![0.1])),
            Arc::new(MockVectorStore::new(vec![])),
            Arc::new(MockCompleter::new(&[])),
        );
        let persistence = Arc::new(PersistenceSink::new(
            store.clone(),
            Arc::new(EventBus::default()),
            QueueSettings::default(),
        ));
        let pipeline = RagPipeline::new(clients, persistence, PipelineSettings::from(&config.rag));

        let result = pipeline
            .stream_answer(
                &CancellationToken::new(),
                &alice,
                Some(&chat.id),
                "follow-up",
                &mut RecordingSink::default(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(store.list_chats(&alice).await.unwrap().len(), 1);
    }

    #[test]
    fn title_is_truncated_by_characters() {
        assert_eq!(chat_title("  short question  "), "short question");
        let long = "é".repeat(60);
        let title = chat_title(&long);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[tokio::test]
    async fn creates_chat_and_persists_both_messages() {
        let f = fixture(&["Metoprolol ", "is dosed..."]);
        let mut sink = RecordingSink::default();

        let chat = f
            .pipeline
            .stream_answer(
                &CancellationToken::new(),
                &UserId::from("alice"),
                None,
                "What is the standard dosage for metoprolol?",
                &mut sink,
            )
            .await
            .unwrap();
        f.pipeline.persistence().shutdown().await;

        assert_eq!(chat.title, "What is the standard dosage for metoprolol?");
        assert_eq!(sink.answer(), "Metoprolol is dosed...");
        assert_eq!(sink.sources, vec![vec!["Metoprolol".to_string(), "Beta blockers".to_string()]]);
        assert_eq!(
            sink.stages,
            vec![PipelineStage::Understanding, PipelineStage::Searching, PipelineStage::Thinking]
        );

        let messages = f.store.list_messages(&chat.id).await.unwrap();
        let kinds: Vec<MessageKind> = messages.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MessageKind::User, MessageKind::Assistant]);
        assert_eq!(messages[1].content, "Metoprolol is dosed...");
    }

    #[tokio::test]
    async fn blank_question_is_rejected_before_any_work() {
        let f = fixture(&["x"]);
        let mut sink = RecordingSink::default();

        let err = f
            .pipeline
            .stream_answer(&CancellationToken::new(), &UserId::from("alice"), None, "  \t", &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(f.store.message_count().await, 0);
        assert_eq!(f.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn failed_stream_persists_only_the_question() {
        let f = fixture_with(
            MockCompleter::ending(&["partial"], StreamEnding::Fail(ProviderError::StreamInterrupted("reset".into()))),
            MockEmbedder::new(vec![0.1]),
        );
        let mut sink = RecordingSink::default();

        let err = f
            .pipeline
            .stream_answer(&CancellationToken::new(), &UserId::from("alice"), None, "q", &mut sink)
            .await
            .unwrap_err();
        f.pipeline.persistence().shutdown().await;

        assert!(matches!(err, Error::Provider(ProviderError::StreamInterrupted(_))));
        assert_eq!(f.store.message_count().await, 1);
        assert_eq!(f.completer.calls(), 1);
    }

    #[tokio::test]
    async fn transient_embedding_failure_is_retried() {
        let f = fixture_with(MockCompleter::new(&["ok"]), MockEmbedder::flaky(vec![0.1], 2));
        let mut sink = RecordingSink::default();

        f.pipeline
            .stream_answer(&CancellationToken::new(), &UserId::from("alice"), None, "q", &mut sink)
            .await
            .unwrap();

        assert_eq!(f.embedder.calls(), 3);
        assert_eq!(f.vectors.calls(), 1);
    }

    #[tokio::test]
    async fn spawn_stream_emits_ordered_events() {
        let f = fixture(&["a", "b"]);
        let pipeline = Arc::new(f.pipeline);

        let mut rx = pipeline.spawn_stream(
            CancellationToken::new(),
            UserId::from("alice"),
            None,
            "What is the standard dosage for metoprolol?".into(),
        );

        let mut types = Vec::new();
        while let Some(event) = rx.recv().await {
            types.push(event.event_type());
        }
        assert_eq!(
            types,
            vec!["status", "status", "status", "sources", "delta", "delta", "done"]
        );
    }
}
