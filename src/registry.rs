//! Paginated, filterable view of the server's task list.

use tracing::debug;

use crate::api::events::StatusUpdate;
use crate::api::{ListQuery, Task, TaskId, TaskPage, TaskStatus};
use crate::config::PAGE_SIZE_CHOICES;
use crate::error::LoadError;

/// A list fetch issued by the registry, tagged so late responses can be dropped
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListRequest {
    pub seq: u64,
    pub query: ListQuery,
}

pub struct TaskRegistry {
    page: usize,
    page_size: usize,
    total: u64,
    tasks: Vec<Task>,
    selected: usize,
    status_filter: Option<TaskStatus>,
    error: Option<String>,
    seq: u64,
}

impl TaskRegistry {
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            total: 0,
            tasks: Vec::new(),
            selected: 0,
            status_filter: None,
            error: None,
            seq: 0,
        }
    }

    /// Issue a fetch of the current page
    pub fn refresh(&mut self) -> ListRequest {
        self.seq += 1;
        ListRequest {
            seq: self.seq,
            query: ListQuery {
                offset: (self.page - 1) * self.page_size,
                limit: self.page_size,
                status: self.status_filter,
            },
        }
    }

    /// Apply a list response. Returns false when a newer request superseded it.
    pub fn apply_page(&mut self, seq: u64, result: Result<TaskPage, LoadError>) -> bool {
        if seq != self.seq {
            debug!(seq, latest = self.seq, "dropping superseded task list");
            return false;
        }
        match result {
            Ok(page) => {
                self.total = page.total;
                self.tasks = page.tasks;
                self.selected = self.selected.min(self.tasks.len().saturating_sub(1));
                self.error = None;
            }
            Err(err) => {
                self.error = Some(format!("Failed to load tasks: {}", err));
            }
        }
        true
    }

    /// Patch a task in place from a live status event.
    ///
    /// Returns a refresh request when the task is not on the current page.
    pub fn apply_status(&mut self, update: &StatusUpdate) -> Option<ListRequest> {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == update.task_id) else {
            return Some(self.refresh());
        };
        task.status = update.status;
        if let Some(code) = update.exit_code {
            task.exit_code = code;
        }
        if let Some(reason) = &update.reason {
            task.reason = reason.clone();
        }
        // A filtered page may no longer contain this task
        if self.status_filter.is_some_and(|s| s != update.status) {
            return Some(self.refresh());
        }
        None
    }

    pub fn next_page(&mut self) -> Option<ListRequest> {
        if self.page >= self.total_pages() {
            return None;
        }
        self.page += 1;
        self.selected = 0;
        Some(self.refresh())
    }

    pub fn prev_page(&mut self) -> Option<ListRequest> {
        if self.page <= 1 {
            return None;
        }
        self.page -= 1;
        self.selected = 0;
        Some(self.refresh())
    }

    /// Step through the page size choices; `forward` picks the next larger one
    pub fn cycle_page_size(&mut self, forward: bool) -> ListRequest {
        let idx = PAGE_SIZE_CHOICES
            .iter()
            .position(|&s| s >= self.page_size)
            .unwrap_or(PAGE_SIZE_CHOICES.len() - 1);
        let idx = if forward {
            (idx + 1).min(PAGE_SIZE_CHOICES.len() - 1)
        } else {
            idx.saturating_sub(1)
        };
        self.page_size = PAGE_SIZE_CHOICES[idx];
        self.page = 1;
        self.selected = 0;
        self.refresh()
    }

    /// All, then each status in wire order, then back to all
    pub fn cycle_status_filter(&mut self) -> ListRequest {
        self.status_filter = match self.status_filter {
            None => Some(TaskStatus::ALL[0]),
            Some(current) => TaskStatus::ALL
                .iter()
                .position(|&s| s == current)
                .and_then(|i| TaskStatus::ALL.get(i + 1).copied()),
        };
        self.page = 1;
        self.selected = 0;
        self.refresh()
    }

    pub fn select_next(&mut self) {
        if !self.tasks.is_empty() {
            self.selected = (self.selected + 1).min(self.tasks.len() - 1);
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn selected_task(&self) -> Option<&Task> {
        self.tasks.get(self.selected)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn status_filter(&self) -> Option<TaskStatus> {
        self.status_filter
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn total_pages(&self) -> usize {
        (self.total as usize).div_ceil(self.page_size).max(1)
    }

    pub fn page_info(&self) -> String {
        format!(
            "Page {} of {} ({} total tasks)",
            self.page,
            self.total_pages(),
            self.total
        )
    }
}
