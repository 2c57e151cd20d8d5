use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        Block, Borders, Cell, Clear, Paragraph, Row, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Table, TableState, Wrap,
    },
};

use crate::api::{TaskStatus, format_timestamp};
use crate::app::{AppState, ConnectionState, FormField, InputMode, View};
use crate::viewport::DisplayState;

/// Draw the entire UI
pub fn draw(frame: &mut Frame, state: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(3),    // Task list or log view
            Constraint::Length(1), // Status bar
            Constraint::Length(1), // Message / prompt bar
        ])
        .split(frame.area());

    draw_header(frame, state, chunks[0]);
    match state.view {
        View::Tasks => draw_task_list(frame, state, chunks[1]),
        View::Logs => draw_log_view(frame, state, chunks[1]),
    }
    draw_status_bar(frame, state, chunks[2]);
    draw_message_bar(frame, state, chunks[3]);

    if state.mode == InputMode::CreateTask {
        draw_create_form(frame, state);
    }
    if state.show_help {
        draw_help_overlay(frame);
    }
    if let Some(alert) = &state.alert {
        draw_alert(frame, alert);
    }
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Queued => Color::Yellow,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Canceled => Color::DarkGray,
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(2));
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn draw_header(frame: &mut Frame, state: &AppState, area: Rect) {
    let (conn_text, conn_color) = match &state.connection {
        ConnectionState::Connecting => ("connecting", Color::Yellow),
        ConnectionState::Connected => ("live", Color::Green),
        ConnectionState::Disconnected(_) => ("reconnecting", Color::Red),
    };

    let context = match state.view {
        View::Tasks => format!("tasks | {}", state.registry.page_info()),
        View::Logs => match state.viewport.task_id() {
            Some(id) => format!("logs of task {}", id),
            None => "logs".to_string(),
        },
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            " taskdeck ",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        ),
        Span::raw("| "),
        Span::styled(context, Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
        Span::styled(conn_text, Style::default().fg(conn_color)),
    ]))
    .style(Style::default().bg(Color::DarkGray));

    frame.render_widget(header, area);
}

fn draw_task_list(frame: &mut Frame, state: &AppState, area: Rect) {
    let registry = &state.registry;
    let title = match registry.status_filter() {
        Some(status) => format!(" Tasks [{}] ", status.label()),
        None => " Tasks ".to_string(),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    if let Some(err) = registry.error() {
        let msg = Paragraph::new(err)
            .style(Style::default().fg(Color::Red))
            .block(block);
        frame.render_widget(msg, area);
        return;
    }
    if registry.tasks().is_empty() {
        let msg = Paragraph::new("No tasks found.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(msg, area);
        return;
    }

    let rows: Vec<Row> = registry
        .tasks()
        .iter()
        .map(|task| {
            let exit = if task.status.is_active() {
                "-".to_string()
            } else {
                task.exit_code.to_string()
            };
            Row::new(vec![
                Cell::from(task.id.to_string()),
                Cell::from(task.name.clone()),
                Cell::from(task.status.label())
                    .style(Style::default().fg(status_color(task.status))),
                Cell::from(exit),
                Cell::from(format_timestamp(task.start_time)),
                Cell::from(format_timestamp(task.end_time)),
                Cell::from(task.command.clone()),
                Cell::from(task.reason.clone()),
            ])
        })
        .collect();

    let header = Row::new(vec![
        "ID", "Name", "Status", "Exit", "Started", "Ended", "Command", "Reason",
    ])
    .style(Style::default().add_modifier(Modifier::BOLD));

    let widths = [
        Constraint::Length(6),
        Constraint::Percentage(15),
        Constraint::Length(10),
        Constraint::Length(5),
        Constraint::Length(20),
        Constraint::Length(20),
        Constraint::Percentage(30),
        Constraint::Min(10),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(block)
        .row_highlight_style(Style::default().bg(Color::Blue).fg(Color::White))
        .highlight_symbol("▶ ");

    let mut table_state = TableState::default().with_selected(Some(registry.selected_index()));
    frame.render_stateful_widget(table, area, &mut table_state);
}

fn draw_log_view(frame: &mut Frame, state: &mut AppState, area: Rect) {
    let header_style = match state.viewport.state() {
        DisplayState::Error(_) => Style::default().fg(Color::Red),
        DisplayState::Lines => Style::default().fg(Color::Cyan),
        _ => Style::default().fg(Color::DarkGray),
    };
    let block = Block::default()
        .title(Span::styled(format!(" {} ", state.viewport.header()), header_style))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let height = inner.height as usize;
    state.viewport.set_viewport_rows(height);
    if height == 0 || state.viewport.state() != &DisplayState::Lines {
        return;
    }

    let gutter_width = state.viewport.total_lines().to_string().len();
    let level_colors = state.level_colors_enabled;
    let gutter_style = Style::default().fg(Color::DarkGray);

    let mut lines_content: Vec<Line<'_>> = Vec::with_capacity(height);
    for line in state.viewport.visible_lines_mut() {
        let number = line.number;
        let rendered = line.get_rendered(level_colors);
        let mut spans = vec![Span::styled(
            format!("{:>width$} │ ", number, width = gutter_width),
            gutter_style,
        )];
        if let Some(first) = rendered.lines.first() {
            spans.extend(first.spans.iter().cloned());
        }
        lines_content.push(Line::from(spans));
    }

    frame.render_widget(Paragraph::new(lines_content), inner);

    let content = state.viewport.rendered_len();
    if content > height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("▲"))
            .end_symbol(Some("▼"));
        let mut scrollbar_state = ScrollbarState::new(content.saturating_sub(height))
            .position(state.viewport.first_visible_index());
        frame.render_stateful_widget(scrollbar, area, &mut scrollbar_state);
    }
}

fn draw_status_bar(frame: &mut Frame, state: &AppState, area: Rect) {
    let mode_str = match (state.mode, state.view) {
        (InputMode::CreateTask, _) => "CREATE",
        (InputMode::RangeInput, _) => "RANGE",
        (InputMode::Normal, View::Tasks) => "TASKS",
        (InputMode::Normal, View::Logs) => "LOGS",
    };

    let summary = match state.view {
        View::Tasks => format!(
            " {} tasks, {} per page ",
            state.registry.total(),
            state.registry.page_size()
        ),
        View::Logs => {
            let viewport = &state.viewport;
            let mut indicators = Vec::new();
            if viewport.is_following() {
                indicators.push("[F]".to_string());
            }
            if viewport.is_loading() {
                indicators.push("[…]".to_string());
            }
            if let Some(staged) = viewport.pending_prefetch() {
                indicators.push(format!("[+{}]", staged.lines.len()));
            } else if viewport.has_more_above() {
                indicators.push(format!("[↑{}]", viewport.batch_size()));
            }
            if state.level_colors_enabled {
                indicators.push("[C]".to_string());
            }
            let loaded = viewport
                .loaded_range()
                .map_or(0, |r| r.to - r.from + 1);
            format!(
                " {}/{} lines shown {} ",
                viewport.rendered_len(),
                loaded,
                indicators.join(" ")
            )
        }
    };

    let help_text = match (state.mode, state.view) {
        (InputMode::CreateTask, _) => " Tab:next field  Enter:submit  Esc:cancel ",
        (InputMode::RangeInput, _) => " Enter:load  Esc:cancel ",
        (_, View::Tasks) => " ?:help  a:new  Enter:logs  x:cancel  D:download ",
        (_, View::Logs) => " ?:help  ::range  r:reload  c:colors  q:close ",
    };

    let status = Line::from(vec![
        Span::styled(
            format!(" {} ", mode_str),
            Style::default().bg(Color::Blue).fg(Color::White),
        ),
        Span::raw(summary),
        Span::styled(help_text, Style::default().fg(Color::DarkGray)),
    ]);

    let paragraph = Paragraph::new(status).style(Style::default().bg(Color::Black));
    frame.render_widget(paragraph, area);
}

fn draw_message_bar(frame: &mut Frame, state: &AppState, area: Rect) {
    if state.mode == InputMode::RangeInput {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(7), Constraint::Min(1)])
            .split(area);
        let prefix = Paragraph::new("lines: ").style(Style::default().fg(Color::Yellow));
        frame.render_widget(prefix, chunks[0]);
        frame.render_widget(&state.range_input, chunks[1]);
        return;
    }

    if let Some(msg) = &state.status_message {
        let content = Line::from(Span::styled(msg.as_str(), Style::default().fg(Color::Yellow)));
        frame.render_widget(Paragraph::new(content), area);
    }
}

fn draw_create_form(frame: &mut Frame, state: &mut AppState) {
    let area = centered(frame.area(), 60, 8);
    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" New task ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(3)])
        .split(inner);

    let focused = state.form_field;
    for (field, title, rect) in [
        (FormField::Name, " Name ", rows[0]),
        (FormField::Command, " Command ", rows[1]),
    ] {
        let border = if field == focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let input = match field {
            FormField::Name => &mut state.name_input,
            FormField::Command => &mut state.command_input,
        };
        input.set_block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(border),
        );
        frame.render_widget(&*input, rect);
    }
}

fn draw_alert(frame: &mut Frame, message: &str) {
    let area = centered(frame.area(), 60, 7);
    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" Error ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .style(Style::default().bg(Color::Black));

    let text = vec![
        Line::from(message.to_string()),
        Line::from(""),
        Line::from(Span::styled(
            "press any key",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(block);
    frame.render_widget(paragraph, area);
}

/// Draw the help overlay
fn draw_help_overlay(frame: &mut Frame) {
    let help_area = centered(frame.area(), 54, 28);
    frame.render_widget(Clear, help_area);

    let help_text = vec![
        Line::from(Span::styled("Keyboard Shortcuts", Style::default().add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from("Tasks:"),
        Line::from("  j/k, ↑/↓     Select task"),
        Line::from("  n/p, →/←     Next/previous page"),
        Line::from("  +/-          Page size"),
        Line::from("  f            Cycle status filter"),
        Line::from("  r            Refresh"),
        Line::from("  a            New task"),
        Line::from("  Enter        View logs"),
        Line::from("  x            Cancel task"),
        Line::from("  D            Download logs"),
        Line::from(""),
        Line::from("Logs:"),
        Line::from("  j/k, ↑/↓     Scroll up/down"),
        Line::from("  PgUp/PgDn    Page up/down"),
        Line::from("  g/G          Go to top/bottom (follow)"),
        Line::from("  :            Load a line range"),
        Line::from("  r            Reload"),
        Line::from("  c            Toggle level colors"),
        Line::from("  q/Esc        Close"),
        Line::from(""),
        Line::from("  ?            Toggle this help"),
        Line::from("  q            Quit (task list)"),
    ];

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    let paragraph = Paragraph::new(help_text).block(block);
    frame.render_widget(paragraph, help_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::sample_task;
    use crate::api::{LogChunk, TaskPage};
    use crate::app::{AppCommand, AppEvent};
    use crate::config::Config;
    use crate::line::LogLine;
    use ratatui::{Terminal, backend::TestBackend};

    fn screen(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn test_draw_task_list() {
        let mut state = AppState::new(&Config::default());
        let Some(AppCommand::FetchTasks(request)) = state.take_commands().pop() else {
            panic!("expected a task fetch");
        };
        state.handle_event(AppEvent::TasksLoaded {
            seq: request.seq,
            result: Ok(TaskPage {
                tasks: vec![sample_task(7, TaskStatus::Failed)],
                total: 1,
            }),
        });

        let mut terminal = Terminal::new(TestBackend::new(140, 12)).unwrap();
        terminal.draw(|frame| draw(frame, &mut state)).unwrap();
        let text = screen(&terminal);
        assert!(text.contains("Page 1 of 1 (1 total tasks)"));
        assert!(text.contains("task-7"));
        assert!(text.contains("Failed"));
    }

    #[test]
    fn test_draw_log_view_with_gutter() {
        let mut state = AppState::new(&Config::default());
        state.open_logs(7);
        let Some(AppCommand::FetchLogs(ticket)) = state.take_commands().pop() else {
            panic!("expected a log fetch");
        };
        state.handle_event(AppEvent::LogsLoaded {
            ticket,
            result: Ok(LogChunk {
                lines: (1..=3).map(|n| LogLine::new(n, format!("step {}", n))).collect(),
                total_lines: 3,
            }),
        });

        let mut terminal = Terminal::new(TestBackend::new(60, 10)).unwrap();
        terminal.draw(|frame| draw(frame, &mut state)).unwrap();
        let text = screen(&terminal);
        assert!(text.contains("Showing lines 1-3 of 3"));
        assert!(text.contains("3 │ step 3"));
        assert!(text.contains("3/3 lines shown [F]"));
        assert_eq!(state.viewport.viewport_rows(), 5);
    }

    #[test]
    fn test_draw_loading_and_alert() {
        let mut state = AppState::new(&Config::default());
        state.open_logs(7);
        state.alert = Some("Failed to cancel task: boom".to_string());

        let mut terminal = Terminal::new(TestBackend::new(80, 16)).unwrap();
        terminal.draw(|frame| draw(frame, &mut state)).unwrap();
        let text = screen(&terminal);
        assert!(text.contains("Loading logs..."));
        assert!(text.contains("Failed to cancel task: boom"));
    }
}
