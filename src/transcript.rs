use crate::constants::STOP_MARKER;
use crate::session::{SessionOutcome, SessionUpdate};
use crate::types::{ConversationId, HistoryEntry, StreamEvent};

/// Lifecycle phase mirrored into the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Stopped,
    Failed,
}

impl StreamPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamPhase::Completed | StreamPhase::Stopped | StreamPhase::Failed)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, StreamPhase::Connecting | StreamPhase::Streaming)
    }

    pub fn label(&self) -> &'static str {
        match self {
            StreamPhase::Idle => "idle",
            StreamPhase::Connecting => "connecting",
            StreamPhase::Streaming => "streaming",
            StreamPhase::Completed => "done",
            StreamPhase::Stopped => "stopped",
            StreamPhase::Failed => "error",
        }
    }
}

impl Default for StreamPhase {
    fn default() -> Self {
        StreamPhase::Idle
    }
}

/// One exchange: an immutable user message and the reply accumulating under it.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub question: String,
    pub answer: String,
    pub finalized: bool,
    pub errored: bool,
    pub started_at: chrono::DateTime<chrono::Local>,
}

impl TranscriptEntry {
    fn new(question: String) -> Self {
        Self {
            question,
            answer: String::new(),
            finalized: false,
            errored: false,
            started_at: chrono::Local::now(),
        }
    }
}

/// Pure reduction of session updates into renderable chat state. No I/O and
/// no terminal types; the TUI projects this after every change.
#[derive(Debug, Default)]
pub struct Transcript {
    /// Persisted exchanges fetched from the backend, shown above the live ones.
    pub past: Vec<HistoryEntry>,
    /// Exchanges from this process, newest last; at most the last one is open.
    pub entries: Vec<TranscriptEntry>,
    pub phase: StreamPhase,
    /// Transient status line; never merged into transcript text.
    pub status_note: String,
    /// 1-based display counter from the latest chunk index.
    pub part: Option<u64>,
    pub conversation_id: Option<ConversationId>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new exchange for `question`. Callers must not start one while
    /// `phase.is_busy()`; the UI disables submission in that window.
    pub fn begin_exchange(&mut self, question: String) {
        self.entries.push(TranscriptEntry::new(question));
        self.phase = StreamPhase::Connecting;
        self.status_note = "connecting".into();
        self.part = None;
    }

    pub fn apply_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Opened => {
                self.phase = StreamPhase::Streaming;
                self.status_note = "connected".into();
            }
            SessionUpdate::Event(event) => self.apply_event(event),
            SessionUpdate::Finished(outcome) => match outcome {
                SessionOutcome::Completed => self.finish_completed(),
                SessionOutcome::Cancelled => self.finish_cancelled(),
                SessionOutcome::Failed { message } => self.finish_failed(&message),
            },
        }
    }

    fn apply_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Start { conversation_id } => {
                if let Some(cid) = conversation_id {
                    self.conversation_id = Some(ConversationId(cid));
                }
                self.phase = StreamPhase::Streaming;
                self.status_note = "started".into();
            }
            StreamEvent::Progress { message } => {
                self.status_note = message;
            }
            StreamEvent::Chunk { content, index } => {
                self.part = Some(index + 1);
                if let Some(entry) = self.open_entry() {
                    entry.answer.push_str(&content);
                }
            }
            StreamEvent::Complete { message } => {
                self.finish_completed();
                if !message.is_empty() {
                    self.status_note = message;
                }
            }
            StreamEvent::Error { message } => {
                if let Some(entry) = self.open_entry() {
                    if !entry.answer.is_empty() {
                        entry.answer.push_str("\n\n");
                    }
                    entry.answer.push_str("**Error:** ");
                    entry.answer.push_str(&message);
                    entry.errored = true;
                    entry.finalized = true;
                }
                self.phase = StreamPhase::Failed;
                self.status_note = message;
            }
        }
    }

    fn finish_completed(&mut self) {
        if let Some(entry) = self.entries.last_mut() {
            entry.finalized = true;
        }
        // A backend-reported error already settled the phase; natural stream
        // end afterwards must not repaint it as success.
        if !self.phase.is_terminal() {
            self.phase = StreamPhase::Completed;
            self.status_note = "done".into();
        }
        self.part = None;
    }

    fn finish_cancelled(&mut self) {
        if let Some(entry) = self.open_entry() {
            if !entry.answer.is_empty() {
                entry.answer.push_str("\n\n");
            }
            entry.answer.push_str(STOP_MARKER);
            entry.finalized = true;
        }
        if !self.phase.is_terminal() {
            self.phase = StreamPhase::Stopped;
            self.status_note = "stopped".into();
        }
        self.part = None;
    }

    fn finish_failed(&mut self, message: &str) {
        if let Some(entry) = self.open_entry() {
            if !entry.answer.is_empty() {
                entry.answer.push_str("\n\n");
            }
            entry.answer.push_str("**Error:** ");
            entry.answer.push_str(message);
            entry.errored = true;
            entry.finalized = true;
        }
        self.phase = StreamPhase::Failed;
        self.status_note = message.to_string();
        self.part = None;
    }

    /// The entry still accepting stream text, if any.
    fn open_entry(&mut self) -> Option<&mut TranscriptEntry> {
        match self.entries.last_mut() {
            Some(entry) if !entry.finalized => Some(entry),
            _ => None,
        }
    }

    pub fn active_text(&self) -> Option<&str> {
        self.entries.last().map(|e| e.answer.as_str())
    }

    /// Replaces the persisted-history section after a backend refresh.
    pub fn set_history(&mut self, entries: Vec<HistoryEntry>) {
        self.past = entries;
    }

    /// Like [`set_history`](Self::set_history), but also drops local
    /// finalized exchanges the backend now returns, so a refresh after a
    /// completed stream never shows the same exchange twice.
    pub fn absorb_history(&mut self, entries: Vec<HistoryEntry>) {
        self.set_history(entries);
        let past = &self.past;
        self.entries
            .retain(|e| !e.finalized || !past.iter().any(|p| p.message == e.question));
    }

    /// "New chat": drops local exchanges and the active conversation anchor.
    /// Persisted history and any in-flight phase flags reset too.
    pub fn reset_local(&mut self) {
        self.entries.clear();
        self.conversation_id = None;
        self.phase = StreamPhase::Idle;
        self.status_note.clear();
        self.part = None;
    }

    /// Status bar text for the current phase.
    pub fn status_line(&self) -> String {
        match self.phase {
            StreamPhase::Streaming => match self.part {
                Some(n) => format!("receiving part {}", n),
                None => self.status_note.clone(),
            },
            _ if self.status_note.is_empty() => self.phase.label().to_string(),
            _ => self.status_note.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, index: u64) -> SessionUpdate {
        SessionUpdate::Event(StreamEvent::Chunk {
            content: content.into(),
            index,
        })
    }

    #[test]
    fn test_monotonic_accumulation() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        for (i, piece) in ["He", "l", "lo", "!"].iter().enumerate() {
            transcript.apply_update(chunk(piece, i as u64));
        }
        assert_eq!(transcript.active_text(), Some("Hello!"));
        assert_eq!(transcript.part, Some(4));
    }

    #[test]
    fn test_scenario_hello_completes() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        transcript.apply_update(SessionUpdate::Event(StreamEvent::Start {
            conversation_id: None,
        }));
        transcript.apply_update(chunk("Hel", 0));
        transcript.apply_update(chunk("lo", 1));
        transcript.apply_update(SessionUpdate::Event(StreamEvent::Complete {
            message: "done".into(),
        }));
        assert_eq!(transcript.active_text(), Some("Hello"));
        assert_eq!(transcript.phase, StreamPhase::Completed);
        assert!(transcript.entries[0].finalized);
    }

    #[test]
    fn test_cancel_preserves_text_and_appends_one_marker() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        transcript.apply_update(chunk("partial answer", 0));
        transcript.apply_update(SessionUpdate::Finished(SessionOutcome::Cancelled));
        let text = transcript.active_text().unwrap();
        assert!(text.starts_with("partial answer"));
        assert_eq!(text.matches("(stopped by user)").count(), 1);
        assert_eq!(transcript.phase, StreamPhase::Stopped);

        // A straggling terminal update must not add a second marker.
        transcript.apply_update(SessionUpdate::Finished(SessionOutcome::Cancelled));
        let text = transcript.active_text().unwrap();
        assert_eq!(text.matches("(stopped by user)").count(), 1);
    }

    #[test]
    fn test_error_event_keeps_accumulated_content() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        transcript.apply_update(chunk("so far", 0));
        transcript.apply_update(SessionUpdate::Event(StreamEvent::Error {
            message: "backend exploded".into(),
        }));
        let text = transcript.active_text().unwrap();
        assert!(text.contains("so far"));
        assert!(text.contains("backend exploded"));
        assert_eq!(transcript.phase, StreamPhase::Failed);

        // Natural close after a backend error must not relabel it a success.
        transcript.apply_update(SessionUpdate::Finished(SessionOutcome::Completed));
        assert_eq!(transcript.phase, StreamPhase::Failed);
    }

    #[test]
    fn test_progress_never_touches_answer_text() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        transcript.apply_update(chunk("body", 0));
        transcript.apply_update(SessionUpdate::Event(StreamEvent::Progress {
            message: "thinking hard".into(),
        }));
        assert_eq!(transcript.active_text(), Some("body"));
        assert_eq!(transcript.status_note, "thinking hard");
    }

    #[test]
    fn test_chunks_after_finalize_are_dropped() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        transcript.apply_update(chunk("done", 0));
        transcript.apply_update(SessionUpdate::Finished(SessionOutcome::Completed));
        transcript.apply_update(chunk(" late", 1));
        assert_eq!(transcript.active_text(), Some("done"));
    }

    #[test]
    fn test_start_records_conversation_id() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        transcript.apply_update(SessionUpdate::Event(StreamEvent::Start {
            conversation_id: Some("cid-1".into()),
        }));
        assert_eq!(
            transcript.conversation_id,
            Some(ConversationId("cid-1".into()))
        );
    }

    #[test]
    fn test_transport_failure_annotates_entry() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        transcript.apply_update(SessionUpdate::Opened);
        transcript.apply_update(chunk("half", 0));
        transcript.apply_update(SessionUpdate::Finished(SessionOutcome::Failed {
            message: "connection reset".into(),
        }));
        let text = transcript.active_text().unwrap();
        assert!(text.contains("half"));
        assert!(text.contains("connection reset"));
        assert!(transcript.entries[0].errored);
    }

    #[test]
    fn test_status_line_shows_part_counter() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("q".into());
        transcript.apply_update(SessionUpdate::Opened);
        transcript.apply_update(chunk("x", 4));
        assert_eq!(transcript.status_line(), "receiving part 5");
    }

    #[test]
    fn test_absorb_history_deduplicates_finalized_entries() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("first".into());
        transcript.apply_update(chunk("answer one", 0));
        transcript.apply_update(SessionUpdate::Finished(SessionOutcome::Completed));
        transcript.begin_exchange("second".into());
        transcript.apply_update(chunk("part", 0));

        // The backend has persisted the completed exchange but not the open one.
        transcript.absorb_history(vec![crate::types::HistoryEntry {
            message: "first".into(),
            response: "answer one".into(),
            conversation_id: None,
            timestamp: None,
        }]);

        assert_eq!(transcript.past.len(), 1);
        assert_eq!(transcript.entries.len(), 1);
        assert_eq!(transcript.entries[0].question, "second");
    }

    #[test]
    fn test_absorb_history_keeps_unmatched_finalized_entries() {
        let mut transcript = Transcript::new();
        transcript.begin_exchange("lost".into());
        transcript.apply_update(chunk("text", 0));
        transcript.apply_update(SessionUpdate::Finished(SessionOutcome::Cancelled));

        // Cancelled exchanges are never persisted; the local copy must stay.
        transcript.absorb_history(vec![]);
        assert_eq!(transcript.entries.len(), 1);
    }

    #[test]
    fn test_reset_local_clears_exchanges_not_history() {
        let mut transcript = Transcript::new();
        transcript.set_history(vec![crate::types::HistoryEntry {
            message: "old q".into(),
            response: "old a".into(),
            conversation_id: None,
            timestamp: None,
        }]);
        transcript.begin_exchange("q".into());
        transcript.apply_update(chunk("a", 0));
        transcript.reset_local();
        assert!(transcript.entries.is_empty());
        assert_eq!(transcript.past.len(), 1);
        assert_eq!(transcript.phase, StreamPhase::Idle);
    }
}
