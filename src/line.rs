use ansi_to_tui::IntoText;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span, Text};

/// Detected log level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    None,
}

impl LogLevel {
    /// Detect log level from a line of text
    pub fn detect(line: &str) -> Self {
        let upper = line.to_uppercase();
        if upper.contains("ERROR") || upper.contains("[E]") || upper.contains("ERR]") {
            LogLevel::Error
        } else if upper.contains("WARN") || upper.contains("[W]") || upper.contains("WRN]") {
            LogLevel::Warn
        } else if upper.contains("INFO") || upper.contains("[I]") || upper.contains("INF]") {
            LogLevel::Info
        } else if upper.contains("DEBUG") || upper.contains("[D]") || upper.contains("DBG]") {
            LogLevel::Debug
        } else if upper.contains("TRACE") || upper.contains("[T]") || upper.contains("TRC]") {
            LogLevel::Trace
        } else {
            LogLevel::None
        }
    }

    pub fn color(&self) -> Option<Color> {
        match self {
            LogLevel::Error => Some(Color::Red),
            LogLevel::Warn => Some(Color::Yellow),
            LogLevel::Info => Some(Color::Green),
            LogLevel::Debug => Some(Color::Blue),
            LogLevel::Trace => Some(Color::DarkGray),
            LogLevel::None => None,
        }
    }
}

/// One numbered line of a task's log, with a cached terminal rendering
#[derive(Clone, Debug)]
pub struct LogLine {
    /// 1-indexed position in the task's log
    pub number: u64,
    /// Line content as produced by the task (may contain ANSI codes)
    pub text: String,
    pub level: LogLevel,
    pub has_ansi: bool,
    /// Rendered text, keyed by whether level colours were applied
    rendered: Option<(bool, Text<'static>)>,
}

impl PartialEq for LogLine {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && self.text == other.text
    }
}

impl Eq for LogLine {}

impl LogLine {
    pub fn new(number: u64, text: impl Into<String>) -> Self {
        let text = text.into();
        let level = LogLevel::detect(&text);
        let has_ansi = text.contains('\x1b');
        Self {
            number,
            text,
            level,
            has_ansi,
            rendered: None,
        }
    }

    /// Get or create the rendered text, optionally applying level coloring
    pub fn get_rendered(&mut self, apply_level_colors: bool) -> &Text<'static> {
        if matches!(self.rendered, Some((colored, _)) if colored != apply_level_colors) {
            self.rendered = None;
        }

        let (_, text) = self.rendered.get_or_insert_with(|| {
            let text = if self.has_ansi {
                self.text
                    .as_bytes()
                    .into_text()
                    .unwrap_or_else(|_| Text::raw(self.text.clone()))
            } else if let Some(color) = self.level.color().filter(|_| apply_level_colors) {
                Text::from(Line::from(Span::styled(
                    self.text.clone(),
                    Style::default().fg(color),
                )))
            } else {
                Text::raw(self.text.clone())
            };
            (apply_level_colors, text)
        });
        text
    }
}
