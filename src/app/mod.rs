use std::io::Stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;
use time::OffsetDateTime;

use crate::config::AppConfig;
use crate::quotes::{AddError, DefaultReason, LoadOutcome, QuoteError};
use crate::sync::{PushTrigger, SyncEvent, SyncWorker};
use crate::ui;

pub mod actions;
pub mod state;

pub use actions::QuoteController;
pub use state::{AddQuoteOverlay, AppState, FormField, OverlayState, PathAction};

enum Action {
    Quit,
    ShowRandom,
    AddQuote,
    NextFilter,
    PreviousFilter,
    Export,
    Import,
    PushNow,
    PullNow,
    ScrollDown,
    ScrollUp,
}

pub struct App {
    pub config: Arc<AppConfig>,
    controller: QuoteController,
    state: AppState,
    list_state: ListState,
    worker: Option<SyncWorker>,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(
        config: Arc<AppConfig>,
        controller: QuoteController,
        worker: Option<SyncWorker>,
    ) -> Self {
        let mut state = AppState::new(config.display.show_category, worker.is_some());
        if controller.load_outcome() == LoadOutcome::Defaulted(DefaultReason::Malformed) {
            state.set_status_message(Some("Stored quotes were unreadable; showing defaults"));
        }
        if let Some(worker) = &worker {
            if config.sync.pull_on_startup {
                worker.request_pull();
                state.sync.pulling = true;
            }
        }
        Self {
            config,
            controller,
            state,
            list_state: ListState::default(),
            worker,
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        result
    }

    pub fn controller(&self) -> &QuoteController {
        &self.controller
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| {
                    let visible = self.controller.visible_quotes().len();
                    self.state.clamp_scroll(visible);
                    if visible == 0 {
                        self.list_state.select(None);
                    } else {
                        self.list_state.select(Some(self.state.scroll));
                    }
                    ui::draw_app(frame, &self.state, &self.controller, &mut self.list_state);
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if self.handle_overlay_key(key) {
            return;
        }

        if key
            .modifiers
            .intersects(KeyModifiers::ALT | KeyModifiers::SUPER)
        {
            return;
        }

        let action = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Quit)
            }
            _ if key.modifiers.contains(KeyModifiers::CONTROL) => None,
            KeyCode::Char('n') | KeyCode::Char(' ') => Some(Action::ShowRandom),
            KeyCode::Char('a') => Some(Action::AddQuote),
            KeyCode::Char('f') | KeyCode::Right => Some(Action::NextFilter),
            KeyCode::Char('F') | KeyCode::Left => Some(Action::PreviousFilter),
            KeyCode::Char('e') => Some(Action::Export),
            KeyCode::Char('i') => Some(Action::Import),
            KeyCode::Char('s') => Some(Action::PushNow),
            KeyCode::Char('p') => Some(Action::PullNow),
            KeyCode::Char('j') | KeyCode::Down => Some(Action::ScrollDown),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::ScrollUp),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::ShowRandom => self.handle_show_random(),
            Action::AddQuote => {
                self.state.open_add_quote();
                self.state.set_status_message(Some(
                    "Enter a new quote • Tab switches to category • Enter saves",
                ));
            }
            Action::NextFilter => self.handle_cycle_filter(1),
            Action::PreviousFilter => self.handle_cycle_filter(-1),
            Action::Export => {
                let default_path = self.config.display.export_file_name.clone();
                self.state.open_path_prompt(PathAction::Export, &default_path);
            }
            Action::Import => {
                self.state.open_path_prompt(PathAction::Import, "");
                self.state
                    .set_status_message(Some("Enter the path of a JSON file to import"));
            }
            Action::PushNow => self.request_push(PushTrigger::Manual),
            Action::PullNow => self.request_pull(),
            Action::ScrollDown => {
                let visible = self.controller.visible_quotes().len();
                self.state.scroll_by(1, visible);
            }
            Action::ScrollUp => {
                let visible = self.controller.visible_quotes().len();
                self.state.scroll_by(-1, visible);
            }
        }
    }

    fn on_tick(&mut self) {
        let events = match &self.worker {
            Some(worker) => worker.drain_events(),
            None => return,
        };
        for event in events {
            self.handle_sync_event(event);
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        let Some(overlay) = self.state.overlay() else {
            return false;
        };
        let is_add_form = matches!(overlay, OverlayState::AddQuote(_));
        match key.code {
            KeyCode::Esc => {
                self.state.close_overlay();
                self.state.set_status_message(Some("Canceled"));
            }
            KeyCode::Enter => {
                if is_add_form {
                    self.submit_add_quote();
                } else {
                    self.submit_path_prompt();
                }
            }
            KeyCode::Tab | KeyCode::BackTab if is_add_form => {
                if let Some(draft) = self.state.add_quote_overlay_mut() {
                    draft.toggle_field();
                }
            }
            KeyCode::Backspace => self.state.pop_input_grapheme(),
            KeyCode::Char(ch)
                if !key.modifiers.intersects(
                    KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                ) =>
            {
                self.state.push_input_char(ch);
            }
            _ => {}
        }
        true
    }

    fn handle_show_random(&mut self) {
        let mut rng = rand::thread_rng();
        match self.controller.show_random(&mut rng) {
            Some(_) => self.state.clear_status_message(),
            None => self.state.set_status_message(Some("No quotes to show")),
        }
    }

    fn handle_cycle_filter(&mut self, delta: isize) {
        match self.controller.cycle_filter(delta) {
            Ok(filter) => {
                let label = filter.label().to_string();
                self.state.scroll = 0;
                self.state
                    .set_status_message(Some(format!("Showing: {label}")));
            }
            Err(err) => {
                tracing::error!(?err, "failed to change category filter");
                self.state
                    .set_status_message(Some("Failed to save category filter"));
            }
        }
    }

    fn submit_add_quote(&mut self) {
        let Some((text, category)) = self
            .state
            .add_quote_overlay_mut()
            .map(|draft| (draft.text.clone(), draft.category.clone()))
        else {
            return;
        };
        match self.controller.add_quote(&text, &category) {
            Ok(quote) => {
                self.state.close_overlay();
                self.state.set_status_message(Some(format!(
                    "Added quote to '{}'",
                    quote.category
                )));
                if self.config.sync.push_after_add && self.worker.is_some() {
                    self.request_push(PushTrigger::AfterAdd);
                }
            }
            Err(AddError::Rejected(_)) => {
                self.state.set_status_message(Some(QuoteError::PROMPT));
            }
            Err(AddError::Storage(err)) => {
                tracing::error!(?err, "failed to persist new quote");
                self.state.close_overlay();
                self.state
                    .set_status_message(Some("Quote added, but saving failed"));
            }
        }
    }

    fn submit_path_prompt(&mut self) {
        let Some((action, raw_path)) = self
            .state
            .path_prompt_mut()
            .map(|prompt| (prompt.action, prompt.path.trim().to_string()))
        else {
            return;
        };
        if raw_path.is_empty() {
            self.state.set_status_message(Some("Path cannot be empty"));
            return;
        }
        let path = PathBuf::from(raw_path);
        self.state.close_overlay();
        match action {
            PathAction::Export => match self.controller.export_to(&path) {
                Ok(count) => self.state.set_status_message(Some(format!(
                    "Exported {count} quotes to {}",
                    path.display()
                ))),
                Err(err) => {
                    tracing::error!(?err, "failed to export quotes");
                    self.state
                        .set_status_message(Some(format!("Export failed: {err:#}")));
                }
            },
            PathAction::Import => match self.controller.import_from(&path) {
                Ok(count) => self.state.set_status_message(Some(format!(
                    "Quotes imported successfully! ({count} added)"
                ))),
                Err(err) => {
                    tracing::error!(?err, "failed to import quotes");
                    self.state
                        .set_status_message(Some(format!("Import failed: {err:#}")));
                }
            },
        }
    }

    fn request_push(&mut self, trigger: PushTrigger) {
        match &self.worker {
            Some(worker) => {
                worker.request_push(trigger);
                self.state.sync.pushing = true;
            }
            None => self
                .state
                .set_status_message(Some("Sync is disabled in config")),
        }
    }

    fn request_pull(&mut self) {
        match &self.worker {
            Some(worker) => {
                worker.request_pull();
                self.state.sync.pulling = true;
                self.state
                    .set_status_message(Some("Fetching quotes from server..."));
            }
            None => self
                .state
                .set_status_message(Some("Sync is disabled in config")),
        }
    }

    fn handle_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Pulled(remote) => {
                self.state.sync.pulling = false;
                match self.controller.apply_pull(remote) {
                    Ok(count) => {
                        self.state.sync.last_error = None;
                        self.state.set_status_message(Some(format!(
                            "Merged {count} quotes from server"
                        )));
                    }
                    Err(err) => {
                        tracing::error!(?err, "failed to merge pulled quotes");
                        self.state.sync.last_error = Some(format!("{err:#}"));
                    }
                }
            }
            SyncEvent::PullFailed(message) => {
                self.state.sync.pulling = false;
                self.state.sync.last_error = Some(message);
                self.state
                    .set_status_message(Some("Error fetching quotes from server"));
            }
            SyncEvent::Pushed { trigger, sent } => {
                tracing::debug!(%trigger, sent, "push acknowledged");
                self.state.sync.pushing = false;
                self.state.sync.last_push_at = Some(OffsetDateTime::now_utc());
                self.state.sync.last_push_trigger = Some(trigger);
                self.state.sync.last_error = None;
                self.state
                    .set_status_message(Some("Quotes synced with server!"));
            }
            SyncEvent::PushFailed { trigger, message } => {
                tracing::debug!(%trigger, "push failure acknowledged");
                self.state.sync.pushing = false;
                self.state.sync.last_error = Some(message);
                self.state
                    .set_status_message(Some("Error syncing quotes with server"));
            }
            SyncEvent::PushSkipped(trigger) => {
                tracing::debug!(%trigger, "push skipped while another is running");
            }
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}
