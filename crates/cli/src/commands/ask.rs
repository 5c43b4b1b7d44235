//! `ragline ask`: stream one answer to the terminal.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use ragline_config::AppConfig;
use ragline_core::error::{Error, Result};
use ragline_core::event::DomainEvent;
use ragline_core::message::{ChatId, UserId};
use ragline_core::sink::{AnswerSink, PipelineStage};
use ragline_pipeline::{PipelineSettings, RagPipeline, StreamEvent};
use ragline_providers::RagClients;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Writes deltas to `out` as they arrive; sources and progress go to `status`.
pub struct TerminalSink<O, S> {
    out: O,
    status: S,
    show_progress: bool,
}

impl TerminalSink<std::io::Stdout, std::io::Stderr> {
    pub fn stdio(show_progress: bool) -> Self {
        Self::new(std::io::stdout(), std::io::stderr(), show_progress)
    }
}

impl<O: Write + Send, S: Write + Send> TerminalSink<O, S> {
    pub fn new(out: O, status: S, show_progress: bool) -> Self {
        Self {
            out,
            status,
            show_progress,
        }
    }
}

#[async_trait]
impl<O: Write + Send, S: Write + Send> AnswerSink for TerminalSink<O, S> {
    async fn on_delta(&mut self, delta: &str) -> Result<()> {
        self.out
            .write_all(delta.as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|e| Error::Delivery(e.to_string()))
    }

    async fn on_sources(&mut self, sources: &[String]) -> Result<()> {
        writeln!(self.status, "Sources: {}", sources.join(", "))
            .map_err(|e| Error::Delivery(e.to_string()))
    }

    async fn on_status(&mut self, stage: PipelineStage) {
        if self.show_progress {
            let _ = writeln!(self.status, "[{}]", stage.as_str());
        }
    }
}

pub async fn run(
    config: &AppConfig,
    user: &UserId,
    chat: Option<String>,
    question: String,
    json: bool,
) -> Result<()> {
    let persistence = super::open_persistence(config).await?;
    let mut events = persistence.subscribe();
    let clients = RagClients::from_config(config)?;
    let pipeline = Arc::new(RagPipeline::new(
        clients,
        persistence.clone(),
        PipelineSettings::from(&config.rag),
    ));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let chat_id = chat.as_deref().map(ChatId::from);
    let result = if json {
        let mut rx = pipeline.spawn_stream(cancel, user.clone(), chat_id, question);
        let mut last = None;
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Unserializable stream event"),
            }
            last = Some(event);
        }
        json_outcome(last.as_ref())
    } else {
        let mut sink = TerminalSink::stdio(true);
        let outcome = pipeline
            .stream_answer(&cancel, user, chat_id.as_ref(), &question, &mut sink)
            .await;
        println!();
        outcome.map(|chat| eprintln!("chat: {}", chat.id))
    };

    // Let queued assistant messages reach the store before exiting
    persistence.shutdown().await;
    report_persistence_failures(&mut events);
    result
}

/// The run failed when its final event is an error, or when it sent none.
fn json_outcome(last: Option<&StreamEvent>) -> Result<()> {
    match last {
        Some(StreamEvent::Done { .. }) => Ok(()),
        Some(StreamEvent::Error { kind, message }) => Err(Error::Delivery(format!(
            "stream ended with {kind:?}: {message}"
        ))),
        _ => Err(Error::Delivery("stream ended without a final event".into())),
    }
}

fn report_persistence_failures(events: &mut broadcast::Receiver<Arc<DomainEvent>>) {
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::PersistenceFailed {
            chat_id,
            operation,
            error_message,
            ..
        } = event.as_ref()
        {
            eprintln!("warning: {operation} failed for chat {chat_id}: {error_message}");
        }
    }
}
