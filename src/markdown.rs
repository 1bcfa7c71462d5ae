use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};

/// Full re-render of accumulated markdown into styled terminal text. Pure
/// function of the input, so re-rendering the same accumulation twice gives
/// identical output, and rendering a growing buffer every chunk stays cheap
/// enough for per-frame use.
pub fn render_markdown(source: &str) -> Text<'static> {
    let mut writer = MarkdownWriter::default();
    for event in Parser::new_ext(source, Options::empty()) {
        writer.handle(event);
    }
    writer.finish()
}

#[derive(Default)]
struct MarkdownWriter {
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    bold: usize,
    italic: usize,
    heading: Option<u8>,
    in_code_block: bool,
    /// Ordered-list counters, one per nesting level; None marks a bullet list.
    list_stack: Vec<Option<u64>>,
    quote_depth: usize,
    link_dest: Option<String>,
}

impl MarkdownWriter {
    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.push_text(&text),
            Event::Code(code) => self.current.push(Span::styled(
                code.to_string(),
                Style::default().fg(Color::Yellow),
            )),
            Event::SoftBreak => self.current.push(Span::raw(" ")),
            Event::HardBreak => self.flush_line(),
            Event::Rule => {
                self.flush_line();
                self.lines.push(Line::from(Span::styled(
                    "─".repeat(32),
                    Style::default().fg(Color::DarkGray),
                )));
                self.blank_line();
            }
            Event::Html(raw) | Event::InlineHtml(raw) => {
                // No HTML in a terminal; keep it visible but muted.
                self.current.push(Span::styled(
                    raw.to_string(),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            Event::TaskListMarker(checked) => {
                let marker = if checked { "[x] " } else { "[ ] " };
                self.current.push(Span::styled(
                    marker.to_string(),
                    Style::default().fg(Color::Yellow),
                ));
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {}
            Tag::Heading { level, .. } => {
                self.flush_line();
                self.heading = Some(level as u8);
            }
            Tag::Strong => self.bold += 1,
            Tag::Emphasis => self.italic += 1,
            Tag::CodeBlock(kind) => {
                self.flush_line();
                self.in_code_block = true;
                let caption = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => {
                        format!("┌─ {}", lang)
                    }
                    _ => "┌─".to_string(),
                };
                self.lines.push(Line::from(Span::styled(
                    caption,
                    Style::default().fg(Color::DarkGray),
                )));
            }
            Tag::List(start) => self.list_stack.push(start),
            Tag::Item => {
                self.flush_line();
                let depth = self.list_stack.len().saturating_sub(1);
                let indent = "  ".repeat(depth);
                let marker = match self.list_stack.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}{}. ", indent, n);
                        *n += 1;
                        marker
                    }
                    _ => format!("{}• ", indent),
                };
                self.current
                    .push(Span::styled(marker, Style::default().fg(Color::Yellow)));
            }
            Tag::BlockQuote(_) => {
                self.flush_line();
                self.quote_depth += 1;
            }
            Tag::Link { dest_url, .. } => {
                self.link_dest = Some(dest_url.to_string());
            }
            Tag::Image { dest_url, .. } => {
                self.link_dest = Some(dest_url.to_string());
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush_line();
                self.blank_line();
            }
            TagEnd::Heading(_) => {
                self.flush_line();
                self.heading = None;
                self.blank_line();
            }
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.lines.push(Line::from(Span::styled(
                    "└─".to_string(),
                    Style::default().fg(Color::DarkGray),
                )));
                self.blank_line();
            }
            TagEnd::List(_) => {
                self.list_stack.pop();
                if self.list_stack.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Item => self.flush_line(),
            TagEnd::BlockQuote(_) => {
                self.flush_line();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.blank_line();
            }
            TagEnd::Link | TagEnd::Image => {
                if let Some(dest) = self.link_dest.take() {
                    self.current.push(Span::styled(
                        format!(" ({})", dest),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
            }
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.in_code_block {
            // A code-block text event can span many lines; keep them verbatim.
            for line in text.lines() {
                self.lines.push(Line::from(Span::styled(
                    format!("  {}", line),
                    Style::default().fg(Color::Green),
                )));
            }
            return;
        }
        self.current
            .push(Span::styled(text.to_string(), self.inline_style()));
    }

    fn inline_style(&self) -> Style {
        let mut style = Style::default();
        if self.heading.is_some() {
            style = style.fg(Color::Cyan).add_modifier(Modifier::BOLD);
        }
        if self.bold > 0 {
            style = style.add_modifier(Modifier::BOLD);
        }
        if self.italic > 0 {
            style = style.add_modifier(Modifier::ITALIC);
        }
        if self.link_dest.is_some() {
            style = style.fg(Color::Blue).add_modifier(Modifier::UNDERLINED);
        }
        style
    }

    fn flush_line(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let mut spans = std::mem::take(&mut self.current);
        if self.quote_depth > 0 {
            spans.insert(
                0,
                Span::styled(
                    "│ ".repeat(self.quote_depth),
                    Style::default().fg(Color::DarkGray),
                ),
            );
        }
        self.lines.push(Line::from(spans));
    }

    fn blank_line(&mut self) {
        if !matches!(self.lines.last(), Some(line) if line.spans.is_empty()) {
            self.lines.push(Line::default());
        }
    }

    fn finish(mut self) -> Text<'static> {
        self.flush_line();
        while matches!(self.lines.last(), Some(line) if line.spans.is_empty()) {
            self.lines.pop();
        }
        Text::from(self.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered_string(text: &Text<'_>) -> String {
        text.lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|s| s.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let source = "# Title\n\nSome **bold** and *italic* with `code`.\n\n```rust\nlet x = 1;\n```\n";
        let first = render_markdown(source);
        let second = render_markdown(source);
        assert_eq!(first, second);
    }

    #[test]
    fn test_bold_becomes_styled_span() {
        let text = render_markdown("plain **strong** tail");
        let line = &text.lines[0];
        let strong = line
            .spans
            .iter()
            .find(|s| s.content.as_ref() == "strong")
            .expect("strong span present");
        assert!(strong.style.add_modifier.contains(Modifier::BOLD));
        let plain = line
            .spans
            .iter()
            .find(|s| s.content.as_ref() == "plain ")
            .expect("plain span present");
        assert!(!plain.style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_code_fence_renders_preformatted_block() {
        let text = render_markdown("```python\nprint('hi')\nprint('bye')\n```");
        let flat = rendered_string(&text);
        assert!(flat.contains("┌─ python"));
        assert!(flat.contains("print('hi')"));
        assert!(flat.contains("print('bye')"));
        assert!(flat.contains("└─"));
        // Code lines keep their own rows rather than flowing together.
        let hi_row = text
            .lines
            .iter()
            .position(|l| l.spans.iter().any(|s| s.content.contains("print('hi')")))
            .unwrap();
        let bye_row = text
            .lines
            .iter()
            .position(|l| l.spans.iter().any(|s| s.content.contains("print('bye')")))
            .unwrap();
        assert_eq!(bye_row, hi_row + 1);
    }

    #[test]
    fn test_link_url_stays_visible() {
        let text = render_markdown("see [the docs](https://example.com/guide)");
        let flat = rendered_string(&text);
        assert!(flat.contains("the docs"));
        assert!(flat.contains("(https://example.com/guide)"));
    }

    #[test]
    fn test_lists_get_markers() {
        let text = render_markdown("- one\n- two\n\n1. first\n2. second\n");
        let flat = rendered_string(&text);
        assert!(flat.contains("• one"));
        assert!(flat.contains("• two"));
        assert!(flat.contains("1. first"));
        assert!(flat.contains("2. second"));
    }

    #[test]
    fn test_heading_is_highlighted() {
        let text = render_markdown("## Section");
        let span = &text.lines[0].spans[0];
        assert_eq!(span.content.as_ref(), "Section");
        assert!(span.style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_partial_markdown_never_panics() {
        // Mid-stream accumulations are routinely cut inside constructs.
        for source in ["**unterminated", "```rust\nlet x", "[half](", "# ", "> quote\n> cont"] {
            let _ = render_markdown(source);
        }
    }

    #[test]
    fn test_plain_text_passthrough() {
        let text = render_markdown("just words");
        assert_eq!(rendered_string(&text), "just words");
    }
}
