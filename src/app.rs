use std::path::PathBuf;

use ratatui::style::{Color, Style};
use tracing::{debug, info, trace};
use tui_textarea::TextArea;

use crate::api::events::LiveEvent;
use crate::api::{LogChunk, NewTask, Task, TaskId, TaskPage};
use crate::config::Config;
use crate::error::{ActionError, LoadError};
use crate::registry::{ListRequest, TaskRegistry};
use crate::viewport::{LoadTicket, LogViewport};

/// Which screen is shown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Tasks,
    Logs,
}

/// Input mode for the application
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Normal navigation mode
    Normal,
    /// Filling in the create-task form
    CreateTask,
    /// Typing a `from-to` line range for the log view
    RangeInput,
}

/// Focused field of the create-task form
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormField {
    Name,
    Command,
}

/// State of the live event channel as last reported
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected(String),
}

/// Work the event loop must perform on the app's behalf
#[derive(Clone, Debug, PartialEq)]
pub enum AppCommand {
    FetchTasks(ListRequest),
    FetchLogs(LoadTicket),
    CreateTask(NewTask),
    CancelTask(TaskId),
    DownloadLogs(TaskId),
}

/// Results and pushes delivered back to the app
#[derive(Debug)]
pub enum AppEvent {
    TasksLoaded {
        seq: u64,
        result: Result<TaskPage, LoadError>,
    },
    LogsLoaded {
        ticket: LoadTicket,
        result: Result<LogChunk, LoadError>,
    },
    TaskCreated(Result<Task, ActionError>),
    TaskCancelled {
        task_id: TaskId,
        result: Result<(), ActionError>,
    },
    LogsDownloaded {
        task_id: TaskId,
        result: Result<PathBuf, ActionError>,
    },
    Live(LiveEvent),
}

/// Main application state
pub struct AppState<'a> {
    pub registry: TaskRegistry,
    pub viewport: LogViewport,
    pub view: View,
    pub mode: InputMode,
    /// Create-task form inputs
    pub name_input: TextArea<'a>,
    pub command_input: TextArea<'a>,
    pub form_field: FormField,
    /// Jump-to-range prompt
    pub range_input: TextArea<'a>,
    /// Blocking message; any key dismisses it
    pub alert: Option<String>,
    /// Status message to display
    pub status_message: Option<String>,
    pub connection: ConnectionState,
    /// Whether to apply log level coloring (for lines without ANSI)
    pub level_colors_enabled: bool,
    /// Whether to show help overlay
    pub show_help: bool,
    /// Whether the app should quit
    pub should_quit: bool,
    commands: Vec<AppCommand>,
}

fn text_input(placeholder: &str) -> TextArea<'static> {
    let mut textarea = TextArea::default();
    textarea.set_cursor_line_style(Style::default());
    textarea.set_placeholder_text(placeholder);
    textarea.set_placeholder_style(Style::default().fg(Color::DarkGray));
    textarea
}

fn input_text(textarea: &TextArea<'_>) -> String {
    textarea.lines().join("\n")
}

/// Parse `from-to` as typed into the range prompt
pub fn parse_range(input: &str) -> Option<(u64, u64)> {
    let (from, to) = input.split_once('-')?;
    Some((from.trim().parse().ok()?, to.trim().parse().ok()?))
}

impl<'a> AppState<'a> {
    pub fn new(config: &Config) -> Self {
        let mut state = Self {
            registry: TaskRegistry::new(config.page_size),
            viewport: LogViewport::new(config.viewport.clone()),
            view: View::Tasks,
            mode: InputMode::Normal,
            name_input: text_input("task name"),
            command_input: text_input("shell command"),
            form_field: FormField::Name,
            range_input: text_input("from-to, e.g. 100-200"),
            alert: None,
            status_message: None,
            connection: ConnectionState::Connecting,
            level_colors_enabled: true,
            show_help: false,
            should_quit: false,
            commands: Vec::new(),
        };
        state.refresh_tasks();
        state
    }

    /// Drain the commands queued since the last call
    pub fn take_commands(&mut self) -> Vec<AppCommand> {
        std::mem::take(&mut self.commands)
    }

    fn push_ticket(&mut self, ticket: Option<LoadTicket>) {
        if let Some(ticket) = ticket {
            self.commands.push(AppCommand::FetchLogs(ticket));
        }
    }

    fn push_list(&mut self, request: Option<ListRequest>) {
        if let Some(request) = request {
            self.commands.push(AppCommand::FetchTasks(request));
        }
    }

    /// Called once per frame
    pub fn on_frame(&mut self) {
        if self.viewport.flush_due() {
            let report = self.viewport.flush();
            trace!(rendered = report.rendered, followed = report.followed, "flushed streamed lines");
            if report.pruned > 0 {
                debug!(pruned = report.pruned, "pruned display lines");
            }
        }
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::TasksLoaded { seq, result } => {
                self.registry.apply_page(seq, result);
            }
            AppEvent::LogsLoaded { ticket, result } => {
                self.viewport.complete(ticket, result);
            }
            AppEvent::TaskCreated(Ok(task)) => {
                info!(task_id = task.id, "task created");
                self.reset_form();
                self.mode = InputMode::Normal;
                self.status_message = Some(format!("Created task {} ({})", task.id, task.name));
                self.refresh_tasks();
            }
            AppEvent::TaskCreated(Err(err)) => {
                self.alert = Some(format!("Failed to create task: {}", err));
            }
            AppEvent::TaskCancelled { task_id, result } => match result {
                // The status change itself arrives over the event channel
                Ok(()) => self.status_message = Some(format!("Cancel requested for task {}", task_id)),
                Err(err) => self.alert = Some(format!("Failed to cancel task: {}", err)),
            },
            AppEvent::LogsDownloaded { task_id, result } => match result {
                Ok(path) => {
                    self.status_message =
                        Some(format!("Saved logs of task {} to {}", task_id, path.display()))
                }
                Err(err) => self.alert = Some(format!("Failed to download logs: {}", err)),
            },
            AppEvent::Live(event) => self.handle_live(event),
        }
    }

    fn handle_live(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Connected => self.connection = ConnectionState::Connected,
            LiveEvent::Disconnected(err) => {
                self.connection = ConnectionState::Disconnected(err.to_string())
            }
            LiveEvent::Status(update) => {
                let request = self.registry.apply_status(&update);
                self.push_list(request);
            }
            LiveEvent::Log { task_id, line } => {
                self.viewport.append_streamed(task_id, line);
            }
        }
    }

    // Task list

    pub fn refresh_tasks(&mut self) {
        let request = self.registry.refresh();
        self.commands.push(AppCommand::FetchTasks(request));
    }

    pub fn next_page(&mut self) {
        let request = self.registry.next_page();
        self.push_list(request);
    }

    pub fn prev_page(&mut self) {
        let request = self.registry.prev_page();
        self.push_list(request);
    }

    pub fn cycle_page_size(&mut self, forward: bool) {
        let request = self.registry.cycle_page_size(forward);
        self.status_message = Some(format!("Page size: {}", self.registry.page_size()));
        self.commands.push(AppCommand::FetchTasks(request));
    }

    pub fn cycle_status_filter(&mut self) {
        let request = self.registry.cycle_status_filter();
        self.status_message = Some(format!(
            "Status filter: {}",
            self.registry.status_filter().map_or("all", |s| s.label())
        ));
        self.commands.push(AppCommand::FetchTasks(request));
    }

    pub fn cancel_selected(&mut self) {
        let Some(task) = self.registry.selected_task() else {
            return;
        };
        if task.is_active() {
            self.commands.push(AppCommand::CancelTask(task.id));
        } else {
            self.status_message = Some("Only queued or running tasks can be cancelled".to_string());
        }
    }

    pub fn download_selected(&mut self) {
        let Some(task) = self.registry.selected_task() else {
            return;
        };
        if task.is_active() {
            self.status_message = Some("Logs can be downloaded once the task has finished".to_string());
        } else {
            self.commands.push(AppCommand::DownloadLogs(task.id));
        }
    }

    // Create-task form

    pub fn start_create(&mut self) {
        self.mode = InputMode::CreateTask;
        self.form_field = FormField::Name;
    }

    pub fn toggle_form_field(&mut self) {
        self.form_field = match self.form_field {
            FormField::Name => FormField::Command,
            FormField::Command => FormField::Name,
        };
    }

    pub fn focused_input(&mut self) -> &mut TextArea<'a> {
        match self.form_field {
            FormField::Name => &mut self.name_input,
            FormField::Command => &mut self.command_input,
        }
    }

    pub fn submit_create(&mut self) {
        match NewTask::new(&input_text(&self.name_input), &input_text(&self.command_input)) {
            Ok(task) => self.commands.push(AppCommand::CreateTask(task)),
            Err(err) => self.alert = Some(err.to_string()),
        }
    }

    pub fn cancel_create(&mut self) {
        self.mode = InputMode::Normal;
    }

    fn reset_form(&mut self) {
        self.name_input = text_input("task name");
        self.command_input = text_input("shell command");
        self.form_field = FormField::Name;
    }

    // Log view

    pub fn open_logs(&mut self, task_id: TaskId) {
        let ticket = self.viewport.open(task_id);
        self.view = View::Logs;
        self.commands.push(AppCommand::FetchLogs(ticket));
    }

    pub fn open_selected_logs(&mut self) {
        if let Some(task_id) = self.registry.selected_task().map(|t| t.id) {
            self.open_logs(task_id);
        }
    }

    pub fn close_logs(&mut self) {
        self.viewport.close();
        self.view = View::Tasks;
        self.mode = InputMode::Normal;
    }

    pub fn reload_logs(&mut self) {
        let ticket = self.viewport.reload();
        self.push_ticket(ticket);
    }

    pub fn start_range_input(&mut self) {
        self.range_input = text_input("from-to, e.g. 100-200");
        self.mode = InputMode::RangeInput;
    }

    pub fn submit_range(&mut self) {
        self.mode = InputMode::Normal;
        let Some((from, to)) = parse_range(&input_text(&self.range_input)) else {
            self.alert = Some("Enter a line range as FROM-TO".to_string());
            return;
        };
        match self.viewport.load_range(from, to) {
            Ok(Some(ticket)) => self.commands.push(AppCommand::FetchLogs(ticket)),
            Ok(None) => self.status_message = Some("Logs are still loading".to_string()),
            Err(err) => self.alert = Some(err.to_string()),
        }
    }

    /// Scroll the log view by whole lines and report the new position
    pub fn scroll_logs(&mut self, delta: isize) {
        self.viewport.scroll_lines(delta);
        let ticket = self.viewport.on_scroll();
        self.push_ticket(ticket);
    }

    pub fn scroll_logs_page(&mut self, down: bool) {
        let rows = self.viewport.viewport_rows().max(1) as isize;
        self.scroll_logs(if down { rows } else { -rows });
    }

    pub fn logs_to_top(&mut self) {
        self.viewport.scroll_to_top();
        let ticket = self.viewport.on_scroll();
        self.push_ticket(ticket);
    }

    /// Jump to the newest line; following resumes from there
    pub fn logs_to_bottom(&mut self) {
        self.viewport.scroll_to_bottom();
    }

    /// Toggle log level coloring
    pub fn toggle_level_colors(&mut self) {
        self.level_colors_enabled = !self.level_colors_enabled;
        self.status_message = Some(format!(
            "Level colors: {}",
            if self.level_colors_enabled { "on" } else { "off" }
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TaskStatus;
    use crate::api::events::StatusUpdate;
    use crate::api::fake::sample_task;
    use crate::error::StreamError;
    use crate::line::LogLine;
    use crate::viewport::{DisplayState, LoadKind};

    fn loaded_state(tasks: &[Task]) -> AppState<'static> {
        let mut state = AppState::new(&Config::default());
        let commands = state.take_commands();
        let Some(AppCommand::FetchTasks(request)) = commands.first() else {
            panic!("expected initial task fetch, got {:?}", commands);
        };
        state.handle_event(AppEvent::TasksLoaded {
            seq: request.seq,
            result: Ok(TaskPage {
                tasks: tasks.to_vec(),
                total: tasks.len() as u64,
            }),
        });
        state
    }

    fn chunk(from: u64, to: u64, total: u64) -> LogChunk {
        LogChunk {
            lines: (from..=to).map(|n| LogLine::new(n, format!("line {}", n))).collect(),
            total_lines: total,
        }
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("100-200"), Some((100, 200)));
        assert_eq!(parse_range(" 5 - 9 "), Some((5, 9)));
        assert_eq!(parse_range("100"), None);
        assert_eq!(parse_range("a-b"), None);
    }

    #[test]
    fn test_startup_fetches_first_page() {
        let state = loaded_state(&[sample_task(1, TaskStatus::Running)]);
        assert_eq!(state.registry.tasks().len(), 1);
        assert_eq!(state.registry.page_info(), "Page 1 of 1 (1 total tasks)");
    }

    #[test]
    fn test_open_and_load_logs() {
        let mut state = loaded_state(&[sample_task(7, TaskStatus::Running)]);
        state.open_selected_logs();
        assert_eq!(state.view, View::Logs);

        let commands = state.take_commands();
        let [AppCommand::FetchLogs(ticket)] = commands.as_slice() else {
            panic!("expected a log fetch, got {:?}", commands);
        };
        assert_eq!(ticket.kind(), LoadKind::Tail);
        assert_eq!(ticket.task_id(), 7);

        state.handle_event(AppEvent::LogsLoaded {
            ticket: *ticket,
            result: Ok(chunk(151, 250, 250)),
        });
        assert_eq!(state.viewport.header(), "Showing lines 151-250 of 250");
    }

    #[test]
    fn test_streamed_lines_flush_on_frame() {
        let mut state = loaded_state(&[sample_task(7, TaskStatus::Running)]);
        state.open_logs(7);
        let Some(AppCommand::FetchLogs(ticket)) = state.take_commands().pop() else {
            panic!("expected a log fetch");
        };
        state.handle_event(AppEvent::LogsLoaded {
            ticket,
            result: Ok(chunk(1, 10, 10)),
        });

        state.handle_event(AppEvent::Live(LiveEvent::Log {
            task_id: 7,
            line: LogLine::new(11, "eleven"),
        }));
        assert_eq!(state.viewport.rendered_len(), 10);
        state.on_frame();
        assert_eq!(state.viewport.rendered_len(), 11);
    }

    #[test]
    fn test_closing_logs_discards_late_result() {
        let mut state = loaded_state(&[]);
        state.open_logs(3);
        let Some(AppCommand::FetchLogs(ticket)) = state.take_commands().pop() else {
            panic!("expected a log fetch");
        };
        state.close_logs();
        state.handle_event(AppEvent::LogsLoaded {
            ticket,
            result: Ok(chunk(1, 10, 10)),
        });
        assert_eq!(state.view, View::Tasks);
        assert_eq!(state.viewport.state(), &DisplayState::Idle);
        assert_eq!(state.viewport.rendered_len(), 0);
    }

    #[test]
    fn test_submit_range() {
        let mut state = loaded_state(&[]);
        state.open_logs(3);
        let Some(AppCommand::FetchLogs(ticket)) = state.take_commands().pop() else {
            panic!("expected a log fetch");
        };
        state.handle_event(AppEvent::LogsLoaded {
            ticket,
            result: Ok(chunk(1, 500, 500)),
        });

        state.start_range_input();
        state.range_input.insert_str("100-200");
        state.submit_range();
        let commands = state.take_commands();
        let [AppCommand::FetchLogs(ticket)] = commands.as_slice() else {
            panic!("expected a range fetch, got {:?}", commands);
        };
        assert_eq!(ticket.bounds(), (100, 200));

        state.start_range_input();
        state.range_input.insert_str("200-100");
        state.submit_range();
        assert!(state.take_commands().is_empty());
        assert_eq!(state.alert.as_deref(), Some("invalid line range 200-100"));
    }

    #[test]
    fn test_create_form_validation() {
        let mut state = loaded_state(&[]);
        state.start_create();
        state.focused_input().insert_str("build");
        state.submit_create();
        assert!(state.take_commands().is_empty());
        assert!(state.alert.is_some());

        state.alert = None;
        state.toggle_form_field();
        state.focused_input().insert_str("make all");
        state.submit_create();
        assert_eq!(
            state.take_commands(),
            vec![AppCommand::CreateTask(NewTask {
                name: "build".to_string(),
                command: "make all".to_string(),
            })]
        );
    }

    #[test]
    fn test_task_created_resets_form_and_refreshes() {
        let mut state = loaded_state(&[]);
        state.start_create();
        state.focused_input().insert_str("build");
        state.handle_event(AppEvent::TaskCreated(Ok(sample_task(9, TaskStatus::Queued))));

        assert_eq!(state.mode, InputMode::Normal);
        assert_eq!(input_text(&state.name_input), "");
        assert!(matches!(
            state.take_commands().as_slice(),
            [AppCommand::FetchTasks(_)]
        ));
    }

    #[test]
    fn test_action_failure_raises_alert() {
        let mut state = loaded_state(&[sample_task(2, TaskStatus::Running)]);
        state.handle_event(AppEvent::TaskCancelled {
            task_id: 2,
            result: Err(ActionError::Rejected("task already finished".to_string())),
        });
        assert_eq!(
            state.alert.as_deref(),
            Some("Failed to cancel task: task already finished")
        );
        // Task state is left to the event channel
        assert_eq!(state.registry.task(2).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn test_download_refusal_shows_server_reason() {
        let mut state = loaded_state(&[sample_task(2, TaskStatus::Running)]);
        state.handle_event(AppEvent::LogsDownloaded {
            task_id: 2,
            result: Err(ActionError::Status {
                status: 400,
                message: "cannot download logs for running or queued tasks".to_string(),
            }),
        });
        assert_eq!(
            state.alert.as_deref(),
            Some(
                "Failed to download logs: HTTP error! status: 400 \
                 (cannot download logs for running or queued tasks)"
            )
        );
    }

    #[test]
    fn test_cancel_and_download_respect_task_state() {
        let mut state = loaded_state(&[sample_task(2, TaskStatus::Running)]);
        state.download_selected();
        assert!(state.take_commands().is_empty());
        state.cancel_selected();
        assert_eq!(state.take_commands(), vec![AppCommand::CancelTask(2)]);

        let mut state = loaded_state(&[sample_task(3, TaskStatus::Completed)]);
        state.cancel_selected();
        assert!(state.take_commands().is_empty());
        state.download_selected();
        assert_eq!(state.take_commands(), vec![AppCommand::DownloadLogs(3)]);
    }

    #[test]
    fn test_live_status_updates_registry() {
        let mut state = loaded_state(&[sample_task(2, TaskStatus::Running)]);
        state.handle_event(AppEvent::Live(LiveEvent::Status(StatusUpdate {
            task_id: 2,
            status: TaskStatus::Completed,
            exit_code: Some(0),
            reason: None,
        })));
        assert_eq!(state.registry.task(2).unwrap().status, TaskStatus::Completed);
        assert!(state.take_commands().is_empty());

        state.handle_event(AppEvent::Live(LiveEvent::Status(StatusUpdate {
            task_id: 99,
            status: TaskStatus::Queued,
            exit_code: None,
            reason: None,
        })));
        assert!(matches!(
            state.take_commands().as_slice(),
            [AppCommand::FetchTasks(_)]
        ));
    }

    #[test]
    fn test_connection_state_tracking() {
        let mut state = loaded_state(&[]);
        assert_eq!(state.connection, ConnectionState::Connecting);
        state.handle_event(AppEvent::Live(LiveEvent::Connected));
        assert_eq!(state.connection, ConnectionState::Connected);
        state.handle_event(AppEvent::Live(LiveEvent::Disconnected(StreamError::Closed)));
        assert!(matches!(state.connection, ConnectionState::Disconnected(_)));
    }

    #[test]
    fn test_scrolling_up_issues_prefetch() {
        let mut state = loaded_state(&[]);
        state.viewport.set_viewport_rows(20);
        state.open_logs(5);
        let Some(AppCommand::FetchLogs(ticket)) = state.take_commands().pop() else {
            panic!("expected a log fetch");
        };
        state.handle_event(AppEvent::LogsLoaded {
            ticket,
            result: Ok(chunk(401, 500, 500)),
        });

        state.logs_to_top();
        let commands = state.take_commands();
        let [AppCommand::FetchLogs(prefetch)] = commands.as_slice() else {
            panic!("expected a prefetch, got {:?}", commands);
        };
        assert_eq!(prefetch.kind(), LoadKind::Prefetch);
        assert_eq!(prefetch.bounds(), (301, 400));
    }
}
