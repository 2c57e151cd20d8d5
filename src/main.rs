mod api;
mod app;
mod config;
mod dispatch;
mod error;
mod input;
mod line;
mod logging;
mod registry;
mod ui;
mod viewport;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::info;

use api::client::RestClient;
use api::events::{EventChannel, LiveEvent};
use app::{AppEvent, AppState};
use config::{Config, DEFAULT_CHANNEL_BUFFER, FRAME_INTERVAL};
use dispatch::Dispatcher;

/// Terminal dashboard for a task-execution service
#[derive(Debug, Parser)]
#[command(name = "taskdeck", version, about)]
struct Cli {
    /// Base URL of the REST API, e.g. http://localhost:8888/api/v1
    #[arg(long, env = "TASKDECK_API_URL")]
    api_url: Option<String>,

    /// Tasks per page
    #[arg(long)]
    page_size: Option<usize>,

    /// Config file (default: platform config dir/taskdeck/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where downloaded logs are written
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// File receiving taskdeck's own diagnostics
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Default log level when TASKDECK_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Open the logs of this task on startup
    #[arg(long)]
    task: Option<u64>,
}

impl Cli {
    /// File and environment settings with these flags on top, validated once
    fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(size) = self.page_size {
            config.page_size = size;
        }
        if let Some(dir) = &self.download_dir {
            config.download_dir = Some(dir.clone());
        }
        if let Some(path) = &self.log_file {
            config.log_file = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.config()?;

    logging::init_to_file(&config.log_file(), &config.log_level)?;

    let client = RestClient::from_url(&config.api_base_url)
        .with_context(|| format!("invalid API URL {}", config.api_base_url))?;
    info!(api = %client.base_url(), "starting taskdeck");
    let events_url = client.events_url()?;

    let (app_tx, mut app_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
    let (live_tx, mut live_rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
    let dispatcher = Dispatcher::new(Arc::new(client), config.download_dir(), app_tx);
    let live = EventChannel::new(events_url, config.reconnect_delay()).spawn(live_tx);

    // Initialize state
    let mut state = AppState::new(&config);
    if let Some(task_id) = cli.task {
        state.open_logs(task_id);
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Setup panic hook to restore terminal on panic
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), DisableMouseCapture, LeaveAlternateScreen);
        original_hook(panic);
    }));

    let result = run_event_loop(
        &mut terminal,
        &mut state,
        &dispatcher,
        &mut app_rx,
        &mut live_rx,
    )
    .await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), DisableMouseCapture, LeaveAlternateScreen)?;

    live.abort();
    info!("taskdeck exiting");
    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut AppState<'_>,
    dispatcher: &Dispatcher,
    app_rx: &mut mpsc::Receiver<AppEvent>,
    live_rx: &mut mpsc::Receiver<LiveEvent>,
) -> Result<()> {
    // Frame clock independent of event traffic
    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = frames.tick() => {
                while event::poll(Duration::ZERO)? {
                    match event::read()? {
                        Event::Key(key) => {
                            // Only handle key press events (not release)
                            if key.kind == KeyEventKind::Press {
                                input::handle_key(state, key);
                            }
                        }
                        Event::Mouse(mouse) => input::handle_mouse(state, mouse),
                        _ => {}
                    }
                }

                // Buffered log lines land at most once per frame
                state.on_frame();

                terminal.draw(|frame| {
                    ui::draw(frame, state);
                })?;
            }

            Some(event) = app_rx.recv() => state.handle_event(event),

            Some(event) = live_rx.recv() => state.handle_event(AppEvent::Live(event)),
        }

        for command in state.take_commands() {
            dispatcher.spawn(command);
        }

        if state.should_quit {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_overrides_invalid_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "page_size = 0\n").unwrap();
        let path = path.to_str().unwrap();

        let cli = Cli::try_parse_from(["taskdeck", "--config", path, "--page-size", "20"]).unwrap();
        let config = cli.config().unwrap();
        assert_eq!(config.page_size, 20);

        let cli = Cli::try_parse_from(["taskdeck", "--config", path]).unwrap();
        assert!(cli.config().is_err());
    }
}
