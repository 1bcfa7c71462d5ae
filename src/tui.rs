use crate::backend::BackendClient;
use crate::constants::{INPUT_MAX_CHARS, LOG_RING_CAPACITY, SCROLL_RESUME_THRESHOLD};
use crate::markdown::render_markdown;
use crate::session::{self, SessionHandle, SessionUpdate};
use crate::str_utils;
use crate::transcript::{StreamPhase, Transcript};
use crate::types::{ConnectionInfo, HistoryPage, SessionId};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, BorderType, Borders, List, ListItem, Paragraph},
};
use std::collections::VecDeque;
use std::{io, time::Duration};
use tokio::sync::broadcast;

/// Everything the terminal view reacts to. Stream updates carry the id of
/// the session that produced them so stale senders can be ignored.
#[derive(Clone, Debug)]
pub enum TuiEvent {
    Stream {
        session_id: SessionId,
        update: SessionUpdate,
    },
    History {
        page: HistoryPage,
    },
    Connection {
        info: Option<ConnectionInfo>,
    },
    NodeRefresh {
        ok: bool,
    },
    LogMessage {
        level: String,
        target: String,
        message: String,
        timestamp: String,
    },
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ActiveTab {
    Chat,
    Logs,
}

#[derive(Debug, Clone, PartialEq)]
enum ConnectionState {
    /// Startup probe still in flight.
    Unknown,
    Online(ConnectionInfo),
    Offline,
}

pub struct AppState {
    active_tab: ActiveTab,
    transcript: Transcript,
    input: String,
    session: Option<SessionHandle>,
    connection: ConnectionState,
    logs: VecDeque<String>,
    chat_scroll: u16,
    follow_bottom: bool,
    /// Measured at the last draw; the key handlers clamp against these.
    chat_total_rows: u16,
    chat_viewport_rows: u16,
    tick: u64,
    should_quit: bool,
}

impl AppState {
    fn new() -> Self {
        Self {
            active_tab: ActiveTab::Chat,
            transcript: Transcript::new(),
            input: String::new(),
            session: None,
            connection: ConnectionState::Unknown,
            logs: VecDeque::with_capacity(LOG_RING_CAPACITY),
            chat_scroll: 0,
            follow_bottom: true,
            chat_total_rows: 0,
            chat_viewport_rows: 0,
            tick: 0,
            should_quit: false,
        }
    }

    fn handle_event(&mut self, event: TuiEvent) {
        match event {
            TuiEvent::Stream { session_id, update } => self.handle_stream(session_id, update),
            TuiEvent::History { page } => self.handle_history(page),
            TuiEvent::Connection { info } => self.handle_connection(info),
            TuiEvent::NodeRefresh { ok } => self.handle_node_refresh(ok),
            TuiEvent::LogMessage {
                timestamp,
                level,
                target,
                message,
            } => self.handle_log_message(timestamp, level, target, message),
        }
    }

    fn handle_stream(&mut self, session_id: SessionId, update: SessionUpdate) {
        // Updates from a replaced session would interleave garbage into the
        // open entry.
        let current = match &self.session {
            Some(handle) => handle.id == session_id,
            None => false,
        };
        if !current {
            tracing::debug!("Dropping update from stale session {}", session_id.short());
            return;
        }
        let finished = matches!(update, SessionUpdate::Finished(_));
        self.transcript.apply_update(update);
        if finished {
            self.session = None;
        }
    }

    fn handle_history(&mut self, page: HistoryPage) {
        self.transcript.absorb_history(page.messages);
    }

    fn handle_connection(&mut self, info: Option<ConnectionInfo>) {
        self.connection = match info {
            Some(info) if info.is_ok() => ConnectionState::Online(info),
            _ => ConnectionState::Offline,
        };
    }

    fn handle_node_refresh(&mut self, ok: bool) {
        self.transcript.status_note = if ok {
            "node data refreshed".to_string()
        } else {
            "node refresh failed".to_string()
        };
    }

    fn handle_log_message(
        &mut self,
        timestamp: String,
        level: String,
        target: String,
        message: String,
    ) {
        let log_line = format!("{} [{}] {}: {}", timestamp, level, target, message);
        self.logs.push_back(log_line);
        if self.logs.len() > LOG_RING_CAPACITY {
            self.logs.pop_front();
        }
    }

    fn stream_busy(&self) -> bool {
        self.session.as_ref().map_or(false, |h| !h.is_finished())
    }

    fn toggle_tab(&mut self) {
        self.active_tab = match self.active_tab {
            ActiveTab::Chat => ActiveTab::Logs,
            ActiveTab::Logs => ActiveTab::Chat,
        };
    }

    fn push_input(&mut self, c: char) {
        if self.input.chars().count() < INPUT_MAX_CHARS {
            self.input.push(c);
        }
    }

    fn max_chat_scroll(&self) -> u16 {
        self.chat_total_rows.saturating_sub(self.chat_viewport_rows)
    }

    /// Scrolling up past the resume threshold detaches the view from the
    /// stream; new chunks keep landing without yanking the viewport down.
    fn scroll_up(&mut self, rows: u16) {
        if self.active_tab != ActiveTab::Chat {
            return;
        }
        if self.follow_bottom {
            self.chat_scroll = self.max_chat_scroll();
        }
        self.chat_scroll = self.chat_scroll.saturating_sub(rows);
        self.update_follow_state();
    }

    fn scroll_down(&mut self, rows: u16) {
        if self.active_tab != ActiveTab::Chat {
            return;
        }
        self.chat_scroll = self
            .chat_scroll
            .saturating_add(rows)
            .min(self.max_chat_scroll());
        self.update_follow_state();
    }

    /// Back within a few rows of the bottom counts as following again.
    fn update_follow_state(&mut self) {
        let distance = self.max_chat_scroll().saturating_sub(self.chat_scroll);
        self.follow_bottom = distance <= SCROLL_RESUME_THRESHOLD;
    }
}

pub struct App {
    rx: broadcast::Receiver<TuiEvent>,
    tx: broadcast::Sender<TuiEvent>,
    backend: BackendClient,
    state: AppState,
}

impl App {
    pub fn new(
        rx: broadcast::Receiver<TuiEvent>,
        tx: broadcast::Sender<TuiEvent>,
        backend: BackendClient,
    ) -> Self {
        Self {
            rx,
            tx,
            backend,
            state: AppState::new(),
        }
    }

    pub async fn run(mut self) -> io::Result<()> {
        crate::logging::setup_panic_hook();

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        loop {
            terminal.draw(|f| self.render(f))?;

            if crossterm::event::poll(Duration::from_millis(10))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
                    Event::Resize(..) => terminal.autoresize()?,
                    _ => {}
                }
            }

            self.state.tick = self.state.tick.wrapping_add(1);

            while let Ok(event) = self.rx.try_recv() {
                self.state.handle_event(event);
            }

            if self.state.should_quit {
                break;
            }
        }

        if let Some(handle) = &self.state.session {
            handle.cancel();
        }

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') | KeyCode::Char('q') => self.state.should_quit = true,
                KeyCode::Char('n') => self.new_chat(),
                KeyCode::Char('k') => self.clear_history(),
                KeyCode::Char('r') => self.refresh_nodes(),
                _ => {}
            }
            return;
        }
        match key.code {
            KeyCode::Enter => self.submit(),
            KeyCode::Esc => self.cancel_stream(),
            KeyCode::Tab => self.state.toggle_tab(),
            KeyCode::Up => self.state.scroll_up(1),
            KeyCode::Down => self.state.scroll_down(1),
            KeyCode::PageUp => {
                let page = self.state.chat_viewport_rows.max(1);
                self.state.scroll_up(page);
            }
            KeyCode::PageDown => {
                let page = self.state.chat_viewport_rows.max(1);
                self.state.scroll_down(page);
            }
            KeyCode::Backspace => {
                self.state.input.pop();
            }
            KeyCode::Char(c) => self.state.push_input(c),
            _ => {}
        }
    }

    fn submit(&mut self) {
        let question = self.state.input.trim().to_string();
        if question.is_empty() {
            return;
        }
        if self.state.stream_busy() {
            self.state.transcript.status_note = "still streaming, press Esc to stop".to_string();
            return;
        }
        self.state.input.clear();
        self.state.transcript.begin_exchange(question.clone());
        self.state.follow_bottom = true;

        let conversation_id = self
            .state
            .transcript
            .conversation_id
            .as_ref()
            .map(|cid| cid.0.clone());
        let handle = session::spawn(
            self.backend.clone(),
            self.tx.clone(),
            question,
            conversation_id,
        );
        self.state.session = Some(handle);
    }

    fn cancel_stream(&mut self) {
        if let Some(handle) = &self.state.session {
            if !handle.is_finished() {
                tracing::info!(
                    "[🖥️  -> ☁️ ] Stop requested for session {}",
                    handle.id.short()
                );
                handle.cancel();
                self.state.transcript.status_note = "stopping".to_string();
            }
        }
    }

    /// Starts a fresh conversation: the running stream (if any) is cancelled
    /// and orphaned, local exchanges vanish, persisted history stays.
    fn new_chat(&mut self) {
        self.cancel_stream();
        self.state.session = None;
        self.state.transcript.reset_local();
        self.state.chat_scroll = 0;
        self.state.follow_bottom = true;
    }

    fn clear_history(&mut self) {
        self.new_chat();
        let backend = self.backend.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.clear_history().await {
                tracing::warn!("[🖥️  -> ☁️ ] History clear failed: {}", e.inner);
                return;
            }
            tracing::info!("[🖥️  -> ☁️ ] History cleared");
            match backend.fetch_history().await {
                Ok(page) => {
                    let _ = tx.send(TuiEvent::History { page });
                }
                Err(e) => tracing::warn!("[☁️  -> 🖥️ ] History refetch failed: {}", e.inner),
            }
        });
    }

    fn refresh_nodes(&self) {
        let backend = self.backend.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let ok = match backend.trigger_node_refresh().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("[🖥️  -> ☁️ ] Node refresh failed: {}", e.inner);
                    false
                }
            };
            let _ = tx.send(TuiEvent::NodeRefresh { ok });
        });
    }

    fn render(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Header
                Constraint::Min(0),    // Chat or logs
                Constraint::Length(3), // Input
                Constraint::Length(1), // Status bar
            ])
            .split(f.size());

        self.render_header(f, chunks[0]);
        match self.state.active_tab {
            ActiveTab::Chat => self.render_chat(f, chunks[1]),
            ActiveTab::Logs => self.render_logs(f, chunks[1]),
        }
        self.render_input(f, chunks[2]);
        self.render_status_bar(f, chunks[3]);
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let (dot, dot_color, label) = match &self.state.connection {
            ConnectionState::Online(info) => (
                "●",
                Color::Green,
                match &info.service {
                    Some(service) => service.clone(),
                    None => "backend".to_string(),
                },
            ),
            ConnectionState::Offline => ("●", Color::Red, "offline".to_string()),
            ConnectionState::Unknown => ("○", Color::DarkGray, "probing".to_string()),
        };

        let other_tab = match self.state.active_tab {
            ActiveTab::Chat => "logs",
            ActiveTab::Logs => "chat",
        };

        let header = Line::from(vec![
            Span::styled(" ARMATURE ", Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(format!("{} {}", dot, label), Style::default().fg(dot_color)),
            Span::raw(format!(
                "  |  history: {}  |  [Tab] {} ",
                self.state.transcript.past.len(),
                other_tab
            )),
        ]);
        f.render_widget(
            Paragraph::new(header).style(Style::default().bg(Color::White).fg(Color::Black)),
            area,
        );
    }

    fn render_chat(&mut self, f: &mut Frame, area: Rect) {
        let title = match &self.state.transcript.conversation_id {
            Some(cid) => format!(" Conversation #{} ", cid.short()),
            None => " Conversation ".to_string(),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(title);
        let inner = block.inner(area);
        f.render_widget(block, area);

        let width = inner.width.max(1);
        let streaming = self.state.transcript.phase.is_busy();

        let mut rows: Vec<Line<'static>> = Vec::new();
        for entry in &self.state.transcript.past {
            push_exchange(&mut rows, &entry.message, &entry.response, false, width);
        }
        let last = self.state.transcript.entries.len().saturating_sub(1);
        for (i, entry) in self.state.transcript.entries.iter().enumerate() {
            let live = streaming && i == last && !entry.finalized;
            push_exchange(&mut rows, &entry.question, &entry.answer, live, width);
        }

        if rows.is_empty() {
            let hint = Paragraph::new("Ask a question about the current node setup.")
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Center);
            f.render_widget(hint, inner);
            self.state.chat_total_rows = 0;
            self.state.chat_viewport_rows = inner.height;
            return;
        }

        self.state.chat_total_rows = rows.len() as u16;
        self.state.chat_viewport_rows = inner.height;
        let max_scroll = self.state.max_chat_scroll();
        if self.state.follow_bottom || self.state.chat_scroll > max_scroll {
            self.state.chat_scroll = max_scroll;
        }

        let paragraph = Paragraph::new(Text::from(rows)).scroll((self.state.chat_scroll, 0));
        f.render_widget(paragraph, inner);
    }

    fn render_logs(&self, f: &mut Frame, area: Rect) {
        let logs_to_show: Vec<ListItem> = self
            .state
            .logs
            .iter()
            .rev()
            .take(area.height.saturating_sub(2) as usize)
            .rev()
            .map(|line| {
                let style = if line.contains("[ERROR]") {
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
                } else if line.contains("[WARN]") {
                    Style::default().fg(Color::Yellow)
                } else if line.contains("[DEBUG]") {
                    Style::default().fg(Color::DarkGray)
                } else if line.contains("[INFO]") {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default()
                };
                ListItem::new(line.clone()).style(style)
            })
            .collect();

        let list = List::new(logs_to_show).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" LOGS ")
                .border_style(Style::default().fg(Color::DarkGray)),
        );

        f.render_widget(list, area);
    }

    fn render_input(&self, f: &mut Frame, area: Rect) {
        let busy = self.state.stream_busy();
        let (title, border_color) = if busy {
            (" Input (streaming, Esc stops) ", Color::DarkGray)
        } else {
            (" Input ", Color::Cyan)
        };

        // Show the tail when the line outgrows the box; the cursor lives at
        // the end.
        let visible = area.width.saturating_sub(3) as usize;
        let shown = str_utils::suffix_chars(&self.state.input, visible);
        let cursor = if self.state.tick / 30 % 2 == 0 { "█" } else { " " };

        let line = Line::from(vec![
            Span::raw(shown.to_string()),
            Span::styled(cursor, Style::default().fg(Color::Cyan)),
        ]);
        let paragraph = Paragraph::new(line).block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(border_color))
                .title(title),
        );
        f.render_widget(paragraph, area);
    }

    fn render_status_bar(&self, f: &mut Frame, area: Rect) {
        let halves = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area);

        let phase = self.state.transcript.phase;
        let phase_color = match phase {
            StreamPhase::Idle => Color::DarkGray,
            StreamPhase::Connecting => Color::Yellow,
            StreamPhase::Streaming => Color::Green,
            StreamPhase::Completed => Color::Green,
            StreamPhase::Stopped => Color::Yellow,
            StreamPhase::Failed => Color::Red,
        };

        let mut left = vec![Span::styled(
            format!(" {} ", phase.label().to_uppercase()),
            Style::default()
                .fg(phase_color)
                .add_modifier(Modifier::BOLD),
        )];
        if phase.is_busy() {
            let spinner = match (self.state.tick / 10) % 4 {
                0 => "/",
                1 => "-",
                2 => "\\",
                _ => "|",
            };
            left.push(Span::styled(spinner, Style::default().fg(phase_color)));
            left.push(Span::raw(" "));
        }
        left.push(Span::styled(
            str_utils::prefix_chars(&self.state.transcript.status_line(), 60).to_string(),
            Style::default().fg(Color::Gray),
        ));
        f.render_widget(Paragraph::new(Line::from(left)), halves[0]);

        let hints = " [Enter] send  [Esc] stop  [^N] new  [^K] clear  [^R] nodes  [^Q] quit ";
        f.render_widget(
            Paragraph::new(hints)
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Right),
            halves[1],
        );
    }
}

/// Appends one question/answer exchange as display rows.
fn push_exchange(
    rows: &mut Vec<Line<'static>>,
    question: &str,
    answer: &str,
    live: bool,
    width: u16,
) {
    let question_line = Line::from(vec![
        Span::styled(
            "You: ",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(question.to_string()),
    ]);
    rows.extend(wrap_line(&question_line, width));

    let mut answer_text = render_markdown(answer);
    if live {
        let cursor = Span::styled("▊", Style::default().fg(Color::Green));
        match answer_text.lines.last_mut() {
            Some(line) => line.spans.push(cursor),
            None => answer_text.lines.push(Line::from(cursor)),
        }
    }
    for line in &answer_text.lines {
        rows.extend(wrap_line(line, width));
    }
    rows.push(Line::default());
}

/// Splits one logical line into display rows of at most `width` cells,
/// breaking at spaces where possible. Wrapping here instead of inside the
/// Paragraph keeps the row count exact, which the scroll math depends on.
fn wrap_line(line: &Line<'static>, width: u16) -> Vec<Line<'static>> {
    let width = width.max(1) as usize;
    if line.width() <= width {
        return vec![line.clone()];
    }

    let mut rows: Vec<Line<'static>> = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut used = 0usize;

    for span in &line.spans {
        for token in span.content.split_inclusive(' ') {
            let mut piece: &str = token;
            if used > 0 && used + display_width(piece) > width {
                rows.push(Line::from(std::mem::take(&mut current)));
                used = 0;
                piece = piece.trim_start();
                if piece.is_empty() {
                    continue;
                }
            }
            while display_width(piece) > width {
                if !current.is_empty() {
                    rows.push(Line::from(std::mem::take(&mut current)));
                    used = 0;
                }
                let (head, tail) = split_at_width(piece, width);
                rows.push(Line::from(vec![Span::styled(head.to_string(), span.style)]));
                piece = tail;
            }
            if !piece.is_empty() {
                used += display_width(piece);
                current.push(Span::styled(piece.to_string(), span.style));
            }
        }
    }
    if !current.is_empty() || rows.is_empty() {
        rows.push(Line::from(current));
    }
    rows
}

fn display_width(s: &str) -> usize {
    Span::raw(s).width()
}

/// Byte offset split so the head occupies at most `width` cells.
fn split_at_width(s: &str, width: usize) -> (&str, &str) {
    let mut acc = 0usize;
    for (idx, ch) in s.char_indices() {
        let mut buf = [0u8; 4];
        let ch_width = display_width(ch.encode_utf8(&mut buf));
        if acc + ch_width > width && idx > 0 {
            return s.split_at(idx);
        }
        acc += ch_width;
    }
    (s, "")
}
