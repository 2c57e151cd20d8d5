use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use tui_textarea::Input;

use crate::app::{AppState, InputMode, View};

const WHEEL_LINES: isize = 3;

/// Handle a mouse event
pub fn handle_mouse(state: &mut AppState, mouse: MouseEvent) {
    if state.alert.is_some() || state.show_help {
        return;
    }
    match (state.view, mouse.kind) {
        (View::Logs, MouseEventKind::ScrollUp) => state.scroll_logs(-WHEEL_LINES),
        (View::Logs, MouseEventKind::ScrollDown) => state.scroll_logs(WHEEL_LINES),
        (View::Tasks, MouseEventKind::ScrollUp) => state.registry.select_prev(),
        (View::Tasks, MouseEventKind::ScrollDown) => state.registry.select_next(),
        _ => {}
    }
}

/// Handle a key event and update app state accordingly
pub fn handle_key(state: &mut AppState, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        state.should_quit = true;
        return;
    }

    // Alerts block until dismissed
    if state.alert.is_some() {
        state.alert = None;
        return;
    }

    if state.show_help {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('?')) {
            state.show_help = false;
        }
        return;
    }

    match state.mode {
        InputMode::CreateTask => handle_form_mode(state, key),
        InputMode::RangeInput => handle_range_mode(state, key),
        InputMode::Normal => match state.view {
            View::Tasks => handle_tasks_mode(state, key),
            View::Logs => handle_logs_mode(state, key),
        },
    }
}

fn handle_tasks_mode(state: &mut AppState, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => state.should_quit = true,
        KeyCode::Char('?') => state.show_help = true,

        KeyCode::Char('j') | KeyCode::Down => state.registry.select_next(),
        KeyCode::Char('k') | KeyCode::Up => state.registry.select_prev(),
        KeyCode::Char('n') | KeyCode::Right => state.next_page(),
        KeyCode::Char('p') | KeyCode::Left => state.prev_page(),
        KeyCode::Char('+') => state.cycle_page_size(true),
        KeyCode::Char('-') => state.cycle_page_size(false),
        KeyCode::Char('f') => state.cycle_status_filter(),
        KeyCode::Char('r') => state.refresh_tasks(),

        KeyCode::Enter | KeyCode::Char('l') => state.open_selected_logs(),
        KeyCode::Char('a') => state.start_create(),
        KeyCode::Char('x') | KeyCode::Delete => state.cancel_selected(),
        KeyCode::Char('D') => state.download_selected(),
        _ => {}
    }
}

fn handle_logs_mode(state: &mut AppState, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => state.close_logs(),
        KeyCode::Char('?') => state.show_help = true,

        KeyCode::Char('j') | KeyCode::Down => state.scroll_logs(1),
        KeyCode::Char('k') | KeyCode::Up => state.scroll_logs(-1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            state.scroll_logs_page(true)
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            state.scroll_logs_page(false)
        }
        KeyCode::PageDown => state.scroll_logs_page(true),
        KeyCode::PageUp => state.scroll_logs_page(false),
        KeyCode::Char('g') | KeyCode::Home => state.logs_to_top(),
        KeyCode::Char('G') | KeyCode::End => state.logs_to_bottom(),

        KeyCode::Char('r') => state.reload_logs(),
        KeyCode::Char(':') => state.start_range_input(),
        KeyCode::Char('c') => state.toggle_level_colors(),
        _ => {}
    }
}

fn handle_form_mode(state: &mut AppState, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => state.cancel_create(),
        KeyCode::Tab | KeyCode::BackTab => state.toggle_form_field(),
        KeyCode::Enter => state.submit_create(),
        _ => {
            state.focused_input().input(Input::from(key));
        }
    }
}

fn handle_range_mode(state: &mut AppState, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => state.mode = InputMode::Normal,
        KeyCode::Enter => state.submit_range(),
        _ => {
            state.range_input.input(Input::from(key));
        }
    }
}
