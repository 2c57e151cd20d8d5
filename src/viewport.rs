//! Log viewport controller.
//!
//! Keeps a contiguous, bounded window over a task's append-only log, fed from
//! three sources:
//! - the primary load (a tail read on open, or an explicit range)
//! - backward prefetches triggered by scrolling near the top
//! - lines streamed live from the event channel
//!
//! The controller never performs I/O. Operations that need data return a
//! `LoadTicket`; the caller fetches it (see `LoadTicket::fetch`) and hands the
//! result back to `complete`. Every reset bumps a generation counter, so a
//! result that resolves after the view was closed or reopened is discarded.
//!
//! Scroll geometry is measured in abstract units: `line_height` units per
//! line. The terminal UI uses one unit per row.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{LogChunk, TaskApi, TaskId};
use crate::error::LoadError;
use crate::line::LogLine;

/// Tuning knobs for the viewport
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ViewportConfig {
    /// Lines kept from the initial tail load, and the first prefetch size
    pub initial_batch: usize,
    /// Cap for the doubling prefetch size
    pub max_batch: usize,
    /// Prefetch once the scroll position is within this fraction of the
    /// viewport height from the top
    pub prefetch_fraction: f64,
    /// Splice a staged prefetch in once this close to the top (units)
    pub commit_distance: usize,
    /// Auto-scroll on flush when this close to the bottom (units)
    pub follow_threshold: usize,
    /// Buffered streamed lines that force an immediate flush
    pub flush_threshold: usize,
    /// Lines kept in the display before the oldest are pruned
    pub max_display_lines: usize,
    /// Height of one line (units)
    pub line_height: usize,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            initial_batch: 100,
            max_batch: 500,
            prefetch_fraction: 0.4,
            commit_distance: 6,
            follow_threshold: 3,
            flush_threshold: 50,
            max_display_lines: 1000,
            line_height: 1,
        }
    }
}

impl ViewportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_batch == 0 {
            bail!("viewport.initial_batch must be at least 1");
        }
        if self.max_batch < self.initial_batch {
            bail!("viewport.max_batch must not be smaller than viewport.initial_batch");
        }
        if !(self.prefetch_fraction > 0.0 && self.prefetch_fraction <= 1.0) {
            bail!("viewport.prefetch_fraction must be in (0, 1]");
        }
        if self.flush_threshold == 0 || self.max_display_lines == 0 || self.line_height == 0 {
            bail!("viewport.flush_threshold, max_display_lines and line_height must be positive");
        }
        Ok(())
    }
}

/// Inclusive, 1-indexed range of line numbers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineRange {
    pub from: u64,
    pub to: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadKind {
    /// Initial load without a range: the last lines of the log
    Tail,
    /// Explicit jump to a range
    Range,
    /// Speculative backward fetch, staged before display
    Prefetch,
}

/// A load the caller must perform and report back through `complete`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    task_id: TaskId,
    kind: LoadKind,
    from: u64,
    to: u64,
}

impl LoadTicket {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> LoadKind {
        self.kind
    }

    /// Requested bounds; `(0, 0)` for a tail load
    pub fn bounds(&self) -> (u64, u64) {
        (self.from, self.to)
    }

    pub async fn fetch(&self, api: &dyn TaskApi) -> Result<LogChunk, LoadError> {
        api.fetch_log_range(self.task_id, self.from, self.to).await
    }
}

/// Lines fetched by a prefetch but not yet spliced into the display
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedPrefetch {
    pub lines: Vec<LogLine>,
    pub range: LineRange,
}

/// What the display shows besides (or instead of) lines
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayState {
    /// No task open
    Idle,
    Loading,
    Empty,
    Error(String),
    Lines,
}

/// Scroll geometry of the display surface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrollTelemetry {
    pub position: usize,
    pub content_height: usize,
    pub viewport_height: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// The viewport moved on since the load was issued
    Stale,
    Failed(LoadError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub rendered: usize,
    pub pruned: usize,
    pub followed: bool,
}

/// Which end of the display gives way when it outgrows its bound
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trim {
    /// The end further from the viewport
    Farthest,
    Bottom,
}

/// Window over one task's log lines
pub struct LogViewport {
    config: ViewportConfig,
    task_id: Option<TaskId>,
    generation: u64,
    total_lines: u64,
    loaded: Option<LineRange>,
    has_more_above: bool,
    batch_size: usize,
    pending_prefetch: Option<StagedPrefetch>,
    in_flight: Option<LoadTicket>,
    /// Streamed lines awaiting the next flush, in arrival order
    buffer: Vec<LogLine>,
    /// Materialized lines, keyed by line number
    display: BTreeMap<u64, LogLine>,
    state: DisplayState,
    /// Distance from the top of the content to the top of the viewport (units)
    scroll: usize,
    viewport_height: usize,
}

impl LogViewport {
    pub fn new(config: ViewportConfig) -> Self {
        let batch_size = config.initial_batch;
        Self {
            config,
            task_id: None,
            generation: 0,
            total_lines: 0,
            loaded: None,
            has_more_above: false,
            batch_size,
            pending_prefetch: None,
            in_flight: None,
            buffer: Vec::new(),
            display: BTreeMap::new(),
            state: DisplayState::Idle,
            scroll: 0,
            viewport_height: 0,
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.task_id = None;
        self.total_lines = 0;
        self.loaded = None;
        self.has_more_above = false;
        self.batch_size = self.config.initial_batch;
        self.pending_prefetch = None;
        self.in_flight = None;
        self.buffer.clear();
        self.display.clear();
        self.state = DisplayState::Idle;
        self.scroll = 0;
    }

    fn issue(&mut self, task_id: TaskId, kind: LoadKind, from: u64, to: u64) -> LoadTicket {
        let ticket = LoadTicket {
            generation: self.generation,
            task_id,
            kind,
            from,
            to,
        };
        self.in_flight = Some(ticket);
        ticket
    }

    /// Open the log of `task_id`, replacing whatever was shown, and request its tail
    pub fn open(&mut self, task_id: TaskId) -> LoadTicket {
        self.reset();
        self.task_id = Some(task_id);
        self.state = DisplayState::Loading;
        self.issue(task_id, LoadKind::Tail, 0, 0)
    }

    /// Manual full reload of the open task
    pub fn reload(&mut self) -> Option<LoadTicket> {
        let task_id = self.task_id?;
        Some(self.open(task_id))
    }

    /// Close the view. In-flight loads are left to finish and then discarded.
    pub fn close(&mut self) {
        self.reset();
    }

    /// Jump to lines `from..=to` of the open task.
    ///
    /// Returns `Ok(None)` when no task is open or a primary load is already
    /// outstanding; the request is dropped, not queued.
    pub fn load_range(&mut self, from: u64, to: u64) -> Result<Option<LoadTicket>, LoadError> {
        if from < 1 || to < from {
            return Err(LoadError::InvalidRange { from, to });
        }
        let Some(task_id) = self.task_id else {
            return Ok(None);
        };
        if self
            .in_flight
            .is_some_and(|t| t.kind != LoadKind::Prefetch)
        {
            debug!(task_id, from, to, "range load dropped, primary load outstanding");
            return Ok(None);
        }

        // Invalidate any outstanding prefetch; the shown lines stay until the
        // range arrives.
        self.generation += 1;
        self.pending_prefetch = None;
        self.batch_size = self.config.initial_batch;
        self.has_more_above = false;
        Ok(Some(self.issue(task_id, LoadKind::Range, from, to)))
    }

    /// Apply the result of a load issued by this viewport
    pub fn complete(
        &mut self,
        ticket: LoadTicket,
        result: Result<LogChunk, LoadError>,
    ) -> LoadOutcome {
        if ticket.generation != self.generation || self.task_id != Some(ticket.task_id) {
            debug!(
                task_id = ticket.task_id,
                kind = ?ticket.kind,
                "discarding stale log load"
            );
            return LoadOutcome::Stale;
        }
        if self.in_flight == Some(ticket) {
            self.in_flight = None;
        }

        match ticket.kind {
            LoadKind::Tail | LoadKind::Range => self.apply_primary(ticket, result),
            LoadKind::Prefetch => self.apply_prefetch(ticket, result),
        }
    }

    fn apply_primary(
        &mut self,
        ticket: LoadTicket,
        result: Result<LogChunk, LoadError>,
    ) -> LoadOutcome {
        let result = match result {
            Ok(chunk) if chunk.lines.is_empty() && ticket.kind == LoadKind::Range => {
                Err(LoadError::NoData)
            }
            other => other,
        };

        let mut chunk = match result {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(task_id = ticket.task_id, error = %err, "log load failed");
                self.loaded = None;
                self.has_more_above = false;
                self.display.clear();
                self.scroll = 0;
                self.state = DisplayState::Error(err.to_string());
                return LoadOutcome::Failed(err);
            }
        };

        let keep = self.config.initial_batch;
        if ticket.kind == LoadKind::Tail && chunk.lines.len() > keep {
            chunk.lines.drain(..chunk.lines.len() - keep);
        }
        self.total_lines = self.total_lines.max(chunk.total_lines);

        // Lines streamed while the tail was loading, flushed or still
        // buffered, continue the window past the chunk
        let chunk_first = chunk.first_line();
        let chunk_last = chunk.last_line();
        let (streamed, newer) = if ticket.kind == LoadKind::Tail {
            let streamed = match chunk_last {
                Some(last) => self.display.split_off(&(last + 1)),
                None => std::mem::take(&mut self.display),
            };
            if let Some(first) = chunk_first {
                self.buffer.retain(|l| l.number >= first);
            }
            let newer: Vec<u64> = streamed
                .keys()
                .copied()
                .chain(self.buffer.iter().map(|l| l.number))
                .filter(|&n| chunk_last.is_none_or(|last| n > last))
                .collect();
            (streamed, newer)
        } else {
            (BTreeMap::new(), Vec::new())
        };

        self.display = chunk.lines.into_iter().map(|l| (l.number, l)).collect();
        self.display.extend(streamed);

        let from = chunk_first.or_else(|| newer.iter().copied().min());
        let to = chunk_last.max(newer.iter().copied().max());
        let (Some(from), Some(to)) = (from, to) else {
            self.loaded = None;
            self.has_more_above = false;
            self.scroll = 0;
            self.state = DisplayState::Empty;
            return LoadOutcome::Applied;
        };

        self.total_lines = self.total_lines.max(to);
        self.loaded = Some(LineRange { from, to });
        self.has_more_above = from > 1;
        // Buffered lines alone render on the next flush
        self.state = if self.display.is_empty() {
            DisplayState::Empty
        } else {
            DisplayState::Lines
        };

        let at_tail = to == self.total_lines;
        if at_tail {
            self.scroll_to_bottom();
        } else {
            self.scroll = 0;
        }
        self.prune_display(Trim::Farthest);
        if at_tail {
            self.scroll_to_bottom();
        }
        LoadOutcome::Applied
    }

    fn apply_prefetch(
        &mut self,
        ticket: LoadTicket,
        result: Result<LogChunk, LoadError>,
    ) -> LoadOutcome {
        let chunk = match result {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(task_id = ticket.task_id, error = %err, "prefetch failed, will retry on scroll");
                return LoadOutcome::Failed(err);
            }
        };

        let window_start = self.loaded.map_or(u64::MAX, |r| r.from);
        let lines: Vec<LogLine> = chunk
            .lines
            .into_iter()
            .filter(|l| l.number < window_start)
            .collect();

        self.total_lines = self.total_lines.max(chunk.total_lines);
        let (Some(first), Some(last)) = (lines.first(), lines.last()) else {
            self.has_more_above = false;
            return LoadOutcome::Applied;
        };

        let range = LineRange {
            from: first.number,
            to: last.number,
        };
        self.has_more_above = range.from > 1;
        self.batch_size = (self.batch_size * 2).min(self.config.max_batch);
        self.pending_prefetch = Some(StagedPrefetch { lines, range });

        // Already sitting at the top: nothing else will scroll us there
        if self.scroll <= self.config.commit_distance {
            self.commit_prefetch();
        }
        LoadOutcome::Applied
    }

    /// Request the lines above the window when scrolled close enough to the top
    pub fn maybe_prefetch_backward(
        &mut self,
        scroll_position: usize,
        viewport_height: usize,
    ) -> Option<LoadTicket> {
        let task_id = self.task_id?;
        let loaded = self.loaded?;
        if self.state != DisplayState::Lines
            || !self.has_more_above
            || self.is_loading()
            || self.pending_prefetch.is_some()
        {
            return None;
        }
        if scroll_position as f64 >= viewport_height as f64 * self.config.prefetch_fraction {
            return None;
        }

        let to = loaded.from.checked_sub(1).filter(|&to| to >= 1)?;
        let from = to
            .saturating_sub((self.batch_size as u64).saturating_sub(1))
            .max(1);
        debug!(task_id, from, to, batch = self.batch_size, "prefetching log lines");
        Some(self.issue(task_id, LoadKind::Prefetch, from, to))
    }

    /// Splice a staged prefetch in front of the window, keeping the visible
    /// lines where they are on screen
    pub fn commit_prefetch(&mut self) -> bool {
        let Some(staged) = self.pending_prefetch.take() else {
            return false;
        };

        let mut added = 0;
        for line in staged.lines {
            if self.display.insert(line.number, line).is_none() {
                added += 1;
            }
        }
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.from = loaded.from.min(staged.range.from);
        }
        self.scroll += added * self.config.line_height;
        // Keep what was just spliced in; the next prefetch continues above it
        self.prune_display(Trim::Bottom);
        true
    }

    /// Handle scroll telemetry from the display surface
    pub fn on_scroll(&mut self) -> Option<LoadTicket> {
        let t = self.telemetry();
        let ticket = self.maybe_prefetch_backward(t.position, t.viewport_height);
        if t.position <= self.config.commit_distance && self.pending_prefetch.is_some() {
            self.commit_prefetch();
        }
        ticket
    }

    /// Buffer a line streamed for `task_id`; ignored unless that task is open.
    ///
    /// Returns whether the line was accepted.
    pub fn append_streamed(&mut self, task_id: TaskId, line: LogLine) -> bool {
        if self.task_id != Some(task_id) || line.number == 0 {
            return false;
        }

        let number = line.number;
        self.total_lines = self.total_lines.max(number);
        self.loaded = Some(match self.loaded {
            Some(range) => LineRange {
                from: range.from.min(number),
                to: self.total_lines,
            },
            None => LineRange {
                from: number,
                to: self.total_lines,
            },
        });

        self.buffer.push(line);
        if self.buffer.len() >= self.config.flush_threshold {
            self.flush();
        }
        true
    }

    /// Whether buffered lines are waiting for the next frame
    pub fn flush_due(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Move buffered streamed lines into the display in one batch
    pub fn flush(&mut self) -> FlushReport {
        if self.buffer.is_empty() {
            return FlushReport::default();
        }

        let follow = self.is_following();
        let mut batch = std::mem::take(&mut self.buffer);
        // Stable: for duplicate numbers the later arrival is inserted last and wins
        batch.sort_by_key(|l| l.number);
        let rendered = batch.len();
        for line in batch {
            self.display.insert(line.number, line);
        }
        if self.state == DisplayState::Empty {
            self.state = DisplayState::Lines;
        }

        if follow {
            self.scroll_to_bottom();
        }
        let pruned = self.prune_display(Trim::Farthest);
        if follow {
            self.scroll_to_bottom();
        } else {
            self.clamp_scroll();
        }

        FlushReport {
            rendered,
            pruned,
            followed: follow,
        }
    }

    /// Drop lines beyond `max_display_lines`. `loaded` keeps describing what
    /// was fetched.
    fn prune_display(&mut self, trim: Trim) -> usize {
        let mut pruned = 0;
        while self.display.len() > self.config.max_display_lines {
            let above = self.first_visible_index();
            let below = self
                .display
                .len()
                .saturating_sub(above + self.viewport_rows());
            if trim == Trim::Farthest && above >= below {
                self.display.pop_first();
                self.scroll = self.scroll.saturating_sub(self.config.line_height);
            } else {
                self.display.pop_last();
            }
            pruned += 1;
        }
        pruned
    }

    // Display surface

    pub fn set_viewport_rows(&mut self, rows: usize) {
        let follow = self.is_following();
        self.viewport_height = rows * self.config.line_height;
        if follow {
            self.scroll_to_bottom();
        } else {
            self.clamp_scroll();
        }
    }

    pub fn telemetry(&self) -> ScrollTelemetry {
        ScrollTelemetry {
            position: self.scroll,
            content_height: self.content_height(),
            viewport_height: self.viewport_height,
        }
    }

    fn content_height(&self) -> usize {
        self.display.len() * self.config.line_height
    }

    fn max_scroll(&self) -> usize {
        self.content_height().saturating_sub(self.viewport_height)
    }

    fn clamp_scroll(&mut self) {
        self.scroll = self.scroll.min(self.max_scroll());
    }

    /// Within the follow threshold of the bottom
    pub fn is_following(&self) -> bool {
        let below = self
            .content_height()
            .saturating_sub(self.scroll)
            .saturating_sub(self.viewport_height);
        below < self.config.follow_threshold.max(1)
    }

    /// Scroll by whole lines; negative is up
    pub fn scroll_lines(&mut self, delta: isize) {
        let units = delta.unsigned_abs() * self.config.line_height;
        self.scroll = if delta < 0 {
            self.scroll.saturating_sub(units)
        } else {
            (self.scroll + units).min(self.max_scroll())
        };
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
    }

    pub fn viewport_rows(&self) -> usize {
        self.viewport_height / self.config.line_height
    }

    /// Index of the first line shown
    pub fn first_visible_index(&self) -> usize {
        self.scroll / self.config.line_height
    }

    /// Lines currently inside the viewport, top first
    pub fn visible_lines_mut(&mut self) -> impl Iterator<Item = &mut LogLine> {
        let start = self.first_visible_index();
        let rows = self.viewport_height.div_ceil(self.config.line_height);
        self.display.values_mut().skip(start).take(rows)
    }

    pub fn rendered_len(&self) -> usize {
        self.display.len()
    }

    /// Header line for the display surface
    pub fn header(&self) -> String {
        match &self.state {
            DisplayState::Idle => String::new(),
            DisplayState::Loading => "Loading logs...".to_string(),
            DisplayState::Empty => "No logs available.".to_string(),
            DisplayState::Error(msg) => format!("Failed to load logs: {}", msg),
            DisplayState::Lines => match self.loaded {
                Some(r) => format!("Showing lines {}-{} of {}", r.from, r.to, self.total_lines),
                None => String::new(),
            },
        }
    }

    // Accessors

    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn loaded_range(&self) -> Option<LineRange> {
        self.loaded
    }

    pub fn has_more_above(&self) -> bool {
        self.has_more_above
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pending_prefetch(&self) -> Option<&StagedPrefetch> {
        self.pending_prefetch.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }
}
