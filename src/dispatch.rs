//! Runs `AppCommand`s against the API in background tasks and reports the
//! results back to the event loop as `AppEvent`s.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::api::TaskApi;
use crate::app::{AppCommand, AppEvent};

#[derive(Clone)]
pub struct Dispatcher {
    api: Arc<dyn TaskApi>,
    download_dir: PathBuf,
    tx: mpsc::Sender<AppEvent>,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn TaskApi>, download_dir: PathBuf, tx: mpsc::Sender<AppEvent>) -> Self {
        Self {
            api,
            download_dir,
            tx,
        }
    }

    /// Spawn `command`; its result is sent on the event channel when done
    pub fn spawn(&self, command: AppCommand) {
        let api = self.api.clone();
        let download_dir = self.download_dir.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let event = execute(api.as_ref(), &download_dir, command).await;
            if tx.send(event).await.is_err() {
                debug!("event loop gone, dropping command result");
            }
        });
    }
}

pub async fn execute(api: &dyn TaskApi, download_dir: &Path, command: AppCommand) -> AppEvent {
    match command {
        AppCommand::FetchTasks(request) => AppEvent::TasksLoaded {
            seq: request.seq,
            result: api.list_tasks(&request.query).await,
        },
        AppCommand::FetchLogs(ticket) => AppEvent::LogsLoaded {
            result: ticket.fetch(api).await,
            ticket,
        },
        AppCommand::CreateTask(task) => AppEvent::TaskCreated(api.create_task(&task).await),
        AppCommand::CancelTask(task_id) => AppEvent::TaskCancelled {
            task_id,
            result: api.cancel_task(task_id).await,
        },
        AppCommand::DownloadLogs(task_id) => AppEvent::LogsDownloaded {
            task_id,
            result: api.download_logs(task_id, download_dir).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{FakeApi, sample_task};
    use crate::api::{NewTask, TaskStatus};
    use crate::app::AppState;
    use crate::config::Config;

    #[tokio::test]
    async fn test_round_trip_through_dispatcher() {
        let api = Arc::new(FakeApi::with_log(7, 250));
        let (tx, mut rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(api.clone(), PathBuf::from("."), tx);

        let mut state = AppState::new(&Config::default());
        state.open_logs(7);
        for command in state.take_commands() {
            dispatcher.spawn(command);
        }

        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            state.handle_event(event);
        }
        assert_eq!(state.viewport.header(), "Showing lines 151-250 of 250");
        assert_eq!(api.log_requests.lock().unwrap().as_slice(), &[(7, 0, 0)]);
    }

    #[tokio::test]
    async fn test_execute_actions() {
        let api = FakeApi {
            tasks: vec![sample_task(2, TaskStatus::Running)],
            ..FakeApi::default()
        };
        let dir = tempfile::tempdir().unwrap();

        let task = NewTask::new("build", "make").unwrap();
        let event = execute(&api, dir.path(), AppCommand::CreateTask(task.clone())).await;
        assert!(matches!(event, AppEvent::TaskCreated(Ok(_))));
        assert_eq!(api.created.lock().unwrap().as_slice(), &[task]);

        let event = execute(&api, dir.path(), AppCommand::CancelTask(2)).await;
        assert!(matches!(
            event,
            AppEvent::TaskCancelled {
                task_id: 2,
                result: Ok(())
            }
        ));
        assert_eq!(api.cancelled.lock().unwrap().as_slice(), &[2]);
    }

    #[tokio::test]
    async fn test_execute_reports_failures() {
        let api = FakeApi {
            fail_actions: true,
            ..FakeApi::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let event = execute(&api, dir.path(), AppCommand::DownloadLogs(4)).await;
        assert!(matches!(
            event,
            AppEvent::LogsDownloaded {
                task_id: 4,
                result: Err(_)
            }
        ));
    }
}
