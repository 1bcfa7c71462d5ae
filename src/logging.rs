use std::panic;
use tracing::{error, info};

/// Sets up a global panic hook that restores the terminal and logs the panic
/// before handing off to the previous hook. Without the restore, a panic
/// inside the draw loop leaves the shell in raw mode.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = crossterm::terminal::disable_raw_mode();
        let _ = crossterm::execute!(
            std::io::stdout(),
            crossterm::terminal::LeaveAlternateScreen
        );

        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Per-session streaming counters, logged once at every terminal state.
#[derive(Default)]
pub struct StreamMetric {
    pub chunks: usize,
    pub text_chars: usize,
    pub progress_notes: usize,
    pub parse_failures: usize,
    pub ignored_frames: usize,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&mut self, content: &str) {
        self.chunks += 1;
        self.text_chars += content.chars().count();
    }

    pub fn record_progress(&mut self) {
        self.progress_notes += 1;
    }

    pub fn record_parse_failure(&mut self) {
        self.parse_failures += 1;
    }

    pub fn record_ignored(&mut self) {
        self.ignored_frames += 1;
    }

    pub fn log_summary(&self, session_id: &str, outcome: &str, elapsed: std::time::Duration) {
        info!(
            target: "stream",
            "[STREAM END] Session: {} | Outcome: {} | Chunks: {} | Text: {} chars | Progress: {} | Skipped: {} malformed, {} ignored | Elapsed: {}ms",
            session_id,
            outcome,
            self.chunks,
            self.text_chars,
            self.progress_notes,
            self.parse_failures,
            self.ignored_frames,
            elapsed.as_millis()
        );
    }
}
