use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use time::{macros::format_description, OffsetDateTime};
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, FormField, OverlayState, PathAction, SyncIndicator};
use crate::app::QuoteController;
use crate::quotes::{CategoryFilter, Quote};

pub fn draw_app(
    frame: &mut Frame,
    state: &AppState,
    controller: &QuoteController,
    list_state: &mut ListState,
) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.size());

    let displayed: Text = controller
        .last_viewed()
        .map(|quote| {
            let mut lines = vec![Line::from(Span::styled(
                format!("\u{201c}{}\u{201d}", quote.text),
                Style::default().add_modifier(Modifier::BOLD | Modifier::ITALIC),
            ))];
            if state.show_category {
                lines.push(Line::from(""));
                lines.push(Line::from(Span::styled(
                    format!("Category: {}", quote.category),
                    Style::default().fg(Color::Gray),
                )));
            }
            Text::from(lines)
        })
        .unwrap_or_else(|| Text::from("Press `n` to show a random quote."));
    let quote_panel = Paragraph::new(displayed)
        .block(
            Block::default()
                .title("Quote")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(Clear, vertical[0]);
    frame.render_widget(quote_panel, vertical[0]);

    let filter_bar = Paragraph::new(Line::from(category_bar_spans(
        &controller.categories().options(),
        controller.filter(),
    )))
    .block(Block::default().title("Filter").borders(Borders::ALL));
    frame.render_widget(filter_bar, vertical[1]);

    let visible = controller.visible_quotes();
    let mut items: Vec<ListItem> = visible
        .iter()
        .map(|quote| ListItem::new(quote_line(quote)))
        .collect();
    if items.is_empty() {
        items.push(ListItem::new("No quotes in this category."));
    }
    let list = List::new(items)
        .block(
            Block::default()
                .title(format!("Quotes ({})", visible.len()))
                .borders(Borders::ALL),
        )
        .highlight_style(Style::default().bg(Color::Blue).fg(Color::Black))
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, vertical[2], list_state);

    let status = build_status_line(state, controller.quotes().len());
    let status_paragraph = Paragraph::new(status).style(Style::default().fg(Color::Gray));
    frame.render_widget(status_paragraph, vertical[3]);

    render_overlay(frame, state);
}

fn quote_line(quote: &Quote) -> String {
    format!("{} ({})", quote.text, quote.category)
}

fn category_bar_spans(options: &[CategoryFilter], current: &CategoryFilter) -> Vec<Span<'static>> {
    let mut spans = Vec::with_capacity(options.len() * 2);
    for (idx, option) in options.iter().enumerate() {
        if idx > 0 {
            spans.push(Span::raw(" "));
        }
        let label = format!("[{}]", option.label());
        if option == current {
            spans.push(Span::styled(
                label,
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ));
        } else {
            spans.push(Span::styled(label, Style::default().fg(Color::DarkGray)));
        }
    }
    spans
}

fn build_status_line(state: &AppState, total: usize) -> Text<'static> {
    let mut spans = vec![
        Span::raw(format!("Total: {total}")),
        Span::raw(" | Sync: "),
    ];
    let (label, style) = sync_label(&state.sync);
    spans.push(Span::styled(label, style));

    if let Some(message) = &state.status_message {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            message.clone(),
            Style::default().fg(Color::White),
        ));
    }

    let keys = Line::from(Span::styled(
        "Keys: n random • a add • f/F filter • e export • i import • s push • p pull • q quit",
        Style::default().fg(Color::DarkGray),
    ));
    Text::from(vec![Line::from(spans), keys])
}

fn sync_label(sync: &SyncIndicator) -> (String, Style) {
    if !sync.enabled {
        return ("off".to_string(), Style::default().fg(Color::DarkGray));
    }
    if sync.pulling {
        return ("pulling…".to_string(), Style::default().fg(Color::Cyan));
    }
    if sync.pushing {
        return ("pushing…".to_string(), Style::default().fg(Color::Cyan));
    }
    if let Some(error) = &sync.last_error {
        return (
            format!("error: {error}"),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        );
    }
    match (sync.last_push_at, sync.last_push_trigger) {
        (Some(at), Some(trigger)) => (
            format!("pushed {} ({trigger})", format_time_short(at)),
            Style::default().fg(Color::Green),
        ),
        _ => ("idle".to_string(), Style::default().fg(Color::Gray)),
    }
}

fn format_time_short(dt: OffsetDateTime) -> String {
    dt.format(&format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| dt.unix_timestamp().to_string())
}

fn render_overlay(frame: &mut Frame, state: &AppState) {
    match state.overlay() {
        Some(OverlayState::AddQuote(draft)) => {
            let area = centered_rect(60, 40, frame.size());
            frame.render_widget(Clear, area);
            let field_line = |label: &str, value: &str, active: bool| {
                let mut display = value.to_string();
                if active {
                    display.push('▌');
                }
                let label_style = if active {
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Gray)
                };
                Line::from(vec![
                    Span::styled(format!("{label:<10}"), label_style),
                    Span::raw(display),
                ])
            };
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    "Add Quote",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                field_line("Quote", &draft.text, draft.field == FormField::Text),
                field_line(
                    "Category",
                    &draft.category,
                    draft.field == FormField::Category,
                ),
                Line::from(""),
                Line::from(Span::styled(
                    "Tab to switch field • Enter to save • Esc to cancel",
                    Style::default().fg(Color::Gray),
                )),
            ])
            .block(
                Block::default()
                    .title("New Quote")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::PathPrompt(prompt)) => {
            let area = centered_rect(60, 30, frame.size());
            frame.render_widget(Clear, area);
            let (title, heading) = match prompt.action {
                PathAction::Export => ("Export", "Export quotes to JSON file"),
                PathAction::Import => ("Import", "Import quotes from JSON file"),
            };
            let mut path_display = prompt.path.clone();
            path_display.push('▌');
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    heading,
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(path_display),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter to confirm • Esc to cancel",
                    Style::default().fg(Color::Gray),
                )),
            ])
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
            let cursor_x = area.x + 1 + prompt.path.width().min(u16::MAX as usize) as u16;
            if cursor_x < area.right().saturating_sub(1) {
                frame.set_cursor(cursor_x, area.y + 3);
            }
        }
        None => {}
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(vertical[1])[1]
}
