use crate::backend::BackendClient;
use crate::logging::StreamMetric;
use crate::sse::{Frame, SseFrameCodec};
use crate::str_utils::snippet;
use crate::tui::TuiEvent;
use crate::types::{classify, AnalyzeRequest, ConversationId, FrameClass, SessionId, StreamEvent};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

/// Session lifecycle. The three right-hand states are terminal and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// What one running session reports to the UI, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// The backend accepted the request; frames may follow.
    Opened,
    Event(StreamEvent),
    Finished(SessionOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::Failed { .. } => "failed",
        }
    }
}

/// Cancellable handle to one in-flight request. Cloned freely; cancelling any
/// clone aborts the underlying network read. Dropping does not cancel.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl SessionHandle {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the session reached a terminal state; late events carrying
    /// this session's id can be dropped by comparing against the active id,
    /// and a finished handle needs no cancel before starting the next one.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// One request lifecycle: POST the question, read the SSE response through
/// the frame codec, classify every frame, forward typed events to the UI bus.
/// Exactly one cancellation token exists per session and it races exactly one
/// network call.
pub struct StreamSession {
    backend: BackendClient,
    tx: broadcast::Sender<TuiEvent>,
    handle: SessionHandle,
}

impl StreamSession {
    pub fn new(backend: BackendClient, tx: broadcast::Sender<TuiEvent>) -> Self {
        Self {
            backend,
            tx,
            handle: SessionHandle::new(SessionId::new()),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Drives the session to a terminal state. Always emits a final
    /// `SessionUpdate::Finished`; on `Completed` it then re-fetches the
    /// persisted history so the UI reflects what the backend stored.
    pub async fn run(self, request: AnalyzeRequest) {
        let started = std::time::Instant::now();
        let mut metric = StreamMetric::new();

        let outcome = self.drive(&request, &mut metric).await;

        self.handle.mark_finished();
        metric.log_summary(self.handle.id.short(), outcome.label(), started.elapsed());
        self.send(SessionUpdate::Finished(outcome.clone()));

        if outcome == SessionOutcome::Completed {
            match self.backend.fetch_history().await {
                Ok(page) => {
                    let _ = self.tx.send(TuiEvent::History { page });
                }
                Err(e) => {
                    tracing::warn!("[🖥️  -> ☁️ ] History refresh failed: {}", e.inner);
                }
            }
        }
    }

    async fn drive(&self, request: &AnalyzeRequest, metric: &mut StreamMetric) -> SessionOutcome {
        let token = self.handle.token.clone();
        let mut state = SessionState::Idle;
        self.advance(&mut state, SessionState::Requesting);

        // Unanchored conversations get a question-derived local id so their
        // log lines still correlate. It never goes over the wire.
        let anchor = match &request.conversation_id {
            Some(cid) => ConversationId(cid.clone()),
            None => ConversationId::anchor_from_question(&request.question),
        };
        tracing::info!(
            "[🖥️  -> ☁️ ] Session {} asking under {} ({} question chars, {} context chars)",
            self.handle.id.short(),
            anchor.short(),
            request.question.chars().count(),
            request.content.chars().count()
        );

        let response = tokio::select! {
            _ = token.cancelled() => {
                self.advance(&mut state, SessionState::Cancelled);
                return SessionOutcome::Cancelled;
            }
            result = self.backend.open_stream(request) => match result {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("[🖥️  -> ☁️ ] Stream request failed: {}", e.inner);
                    self.advance(&mut state, SessionState::Failed);
                    return SessionOutcome::Failed {
                        message: e.inner.to_string(),
                    };
                }
            },
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                "[☁️  -> 🖥️ ] Backend refused stream: {} {}",
                status,
                snippet(&body, 200)
            );
            self.advance(&mut state, SessionState::Failed);
            return SessionOutcome::Failed {
                message: format!("HTTP {} from backend", status.as_u16()),
            };
        }

        self.advance(&mut state, SessionState::Streaming);
        self.send(SessionUpdate::Opened);

        let bytes_stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let mut frames = FramedRead::new(
            tokio_util::io::StreamReader::new(bytes_stream),
            SseFrameCodec::new(),
        );

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("[🖥️  -> ☁️ ] Session {} cancelled by user", self.handle.id.short());
                    self.advance(&mut state, SessionState::Cancelled);
                    return SessionOutcome::Cancelled;
                }
                frame = frames.next() => frame,
            };

            match next {
                Some(Ok(frame)) => {
                    if let Some(outcome) = self.dispatch_frame(frame, metric) {
                        self.advance(&mut state, SessionState::Completed);
                        return outcome;
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("[☁️  -> 🖥️ ] Transport error mid-stream: {}", e);
                    self.advance(&mut state, SessionState::Failed);
                    return SessionOutcome::Failed {
                        message: e.to_string(),
                    };
                }
                // Natural end of stream, trailing partial frame already flushed.
                None => {
                    self.advance(&mut state, SessionState::Completed);
                    return SessionOutcome::Completed;
                }
            }
        }
    }

    /// Classifies one frame and forwards it. Returns the session outcome when
    /// the frame terminates the stream (`[DONE]` or a `complete` event).
    fn dispatch_frame(&self, frame: Frame, metric: &mut StreamMetric) -> Option<SessionOutcome> {
        match classify(&frame.payload) {
            FrameClass::Done => {
                tracing::debug!("[☁️  -> 🖥️ ] Stream end marker [DONE] received");
                Some(SessionOutcome::Completed)
            }
            FrameClass::Event(event) => {
                match &event {
                    StreamEvent::Start { conversation_id } => {
                        tracing::info!(
                            "[☁️  -> 🖥️ ] Stream opened (conversation: {})",
                            conversation_id.as_deref().unwrap_or("unassigned")
                        );
                    }
                    StreamEvent::Chunk { content, .. } => metric.record_chunk(content),
                    StreamEvent::Progress { .. } => metric.record_progress(),
                    StreamEvent::Error { message } => {
                        tracing::warn!("[☁️  -> 🖥️ ] Backend reported error: {}", message);
                    }
                    StreamEvent::Complete { .. } => {}
                }
                let completes = matches!(event, StreamEvent::Complete { .. });
                self.send(SessionUpdate::Event(event));
                if completes {
                    Some(SessionOutcome::Completed)
                } else {
                    None
                }
            }
            FrameClass::Ignored => {
                metric.record_ignored();
                None
            }
            FrameClass::Malformed { raw } => {
                metric.record_parse_failure();
                tracing::warn!(
                    "[☁️  -> 🖥️ ] Skipping malformed frame: {}",
                    snippet(&raw, 120)
                );
                None
            }
        }
    }

    fn send(&self, update: SessionUpdate) {
        let _ = self.tx.send(TuiEvent::Stream {
            session_id: self.handle.id.clone(),
            update,
        });
    }

    fn advance(&self, state: &mut SessionState, to: SessionState) {
        tracing::debug!(
            "[SESSION] {} {:?} -> {:?}",
            self.handle.id.short(),
            state,
            to
        );
        *state = to;
    }
}

/// Launches a session on the runtime after resolving the node context, and
/// returns its cancellable handle. The context fetch degrades to an empty
/// attachment so a dead plugin bridge never blocks a question.
pub fn spawn(
    backend: BackendClient,
    tx: broadcast::Sender<TuiEvent>,
    question: String,
    conversation_id: Option<String>,
) -> SessionHandle {
    let session = StreamSession::new(backend.clone(), tx);
    let handle = session.handle();
    tokio::spawn(async move {
        let content = match backend.fetch_node_context().await {
            Ok(context) => context.nodes,
            Err(e) => {
                tracing::warn!("[🖥️  -> ☁️ ] Node context unavailable: {}", e.inner);
                String::new()
            }
        };
        session
            .run(AnalyzeRequest {
                question,
                content,
                conversation_id,
            })
            .await;
    });
    handle
}
