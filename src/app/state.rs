use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;

use crate::sync::PushTrigger;

const MAX_INPUT_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Text,
    Category,
}

#[derive(Debug, Clone)]
pub struct AddQuoteOverlay {
    pub text: String,
    pub category: String,
    pub field: FormField,
}

impl Default for AddQuoteOverlay {
    fn default() -> Self {
        Self {
            text: String::new(),
            category: String::new(),
            field: FormField::Text,
        }
    }
}

impl AddQuoteOverlay {
    pub fn toggle_field(&mut self) {
        self.field = match self.field {
            FormField::Text => FormField::Category,
            FormField::Category => FormField::Text,
        };
    }

    pub fn active_mut(&mut self) -> &mut String {
        match self.field {
            FormField::Text => &mut self.text,
            FormField::Category => &mut self.category,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAction {
    Export,
    Import,
}

#[derive(Debug, Clone)]
pub struct PathPromptOverlay {
    pub action: PathAction,
    pub path: String,
}

#[derive(Debug, Clone)]
pub enum OverlayState {
    AddQuote(AddQuoteOverlay),
    PathPrompt(PathPromptOverlay),
}

#[derive(Debug, Clone, Default)]
pub struct SyncIndicator {
    pub enabled: bool,
    pub pulling: bool,
    pub pushing: bool,
    pub last_push_at: Option<OffsetDateTime>,
    pub last_push_trigger: Option<PushTrigger>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub scroll: usize,
    pub show_category: bool,
    pub status_message: Option<String>,
    pub overlay: Option<OverlayState>,
    pub sync: SyncIndicator,
}

impl AppState {
    pub fn new(show_category: bool, sync_enabled: bool) -> Self {
        Self {
            scroll: 0,
            show_category,
            status_message: None,
            overlay: None,
            sync: SyncIndicator {
                enabled: sync_enabled,
                ..SyncIndicator::default()
            },
        }
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn open_add_quote(&mut self) {
        self.overlay = Some(OverlayState::AddQuote(AddQuoteOverlay::default()));
    }

    pub fn open_path_prompt(&mut self, action: PathAction, default_path: &str) {
        self.overlay = Some(OverlayState::PathPrompt(PathPromptOverlay {
            action,
            path: default_path.to_string(),
        }));
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    pub fn add_quote_overlay_mut(&mut self) -> Option<&mut AddQuoteOverlay> {
        match self.overlay.as_mut() {
            Some(OverlayState::AddQuote(draft)) => Some(draft),
            _ => None,
        }
    }

    pub fn path_prompt_mut(&mut self) -> Option<&mut PathPromptOverlay> {
        match self.overlay.as_mut() {
            Some(OverlayState::PathPrompt(prompt)) => Some(prompt),
            _ => None,
        }
    }

    /// Appends to whichever input the open overlay is editing.
    pub fn push_input_char(&mut self, ch: char) {
        if let Some(buffer) = self.active_input_mut() {
            if buffer.chars().count() < MAX_INPUT_LEN {
                buffer.push(ch);
            }
        }
    }

    pub fn pop_input_grapheme(&mut self) {
        if let Some(buffer) = self.active_input_mut() {
            pop_grapheme(buffer);
        }
    }

    fn active_input_mut(&mut self) -> Option<&mut String> {
        match self.overlay.as_mut()? {
            OverlayState::AddQuote(draft) => Some(draft.active_mut()),
            OverlayState::PathPrompt(prompt) => Some(&mut prompt.path),
        }
    }

    pub fn scroll_by(&mut self, delta: isize, visible: usize) {
        if visible == 0 {
            self.scroll = 0;
            return;
        }
        let max = visible as isize - 1;
        self.scroll = (self.scroll as isize + delta).clamp(0, max) as usize;
    }

    pub fn clamp_scroll(&mut self, visible: usize) {
        self.scroll_by(0, visible);
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn clear_status_message(&mut self) {
        self.status_message = None;
    }
}

fn pop_grapheme(buffer: &mut String) {
    if let Some((idx, _)) = buffer.grapheme_indices(true).next_back() {
        buffer.truncate(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_goes_to_active_form_field() {
        let mut state = AppState::new(true, false);
        state.open_add_quote();
        for ch in "hello".chars() {
            state.push_input_char(ch);
        }
        state
            .add_quote_overlay_mut()
            .expect("add overlay open")
            .toggle_field();
        state.push_input_char('c');

        let draft = state.add_quote_overlay_mut().expect("add overlay open");
        assert_eq!(draft.text, "hello");
        assert_eq!(draft.category, "c");
    }

    #[test]
    fn backspace_removes_whole_grapheme() {
        let mut state = AppState::new(true, false);
        state.open_path_prompt(PathAction::Export, "e\u{301}");
        state.pop_input_grapheme();
        assert_eq!(state.path_prompt_mut().expect("prompt open").path, "");
    }

    #[test]
    fn input_without_overlay_is_ignored() {
        let mut state = AppState::new(true, false);
        state.push_input_char('x');
        assert!(state.overlay().is_none());
    }

    #[test]
    fn scroll_is_clamped_to_visible_rows() {
        let mut state = AppState::new(true, false);
        state.scroll_by(10, 3);
        assert_eq!(state.scroll, 2);
        state.scroll_by(-5, 3);
        assert_eq!(state.scroll, 0);
        state.scroll = 7;
        state.clamp_scroll(0);
        assert_eq!(state.scroll, 0);
    }
}
