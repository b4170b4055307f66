use {
    super::renderer::{event_row, format_time},
    crate::dashboard::RealTimeAnalytics,
    ratatui::{
        layout::{Constraint, Direction, Layout as RatLayout, Rect},
        style::{Color, Modifier, Style},
        text::{Line, Span},
        widgets::{Block, Borders, Paragraph, Row, Table},
        Frame,
    },
};

/// Everything one frame needs
#[derive(Debug, Default)]
pub struct DashboardView {
    pub analytics: Option<RealTimeAnalytics>,
    pub last_error: Option<String>,
    pub backend: Option<&'static str>,
    pub fallback_count: u64,
}

/// Render the main UI layout
pub fn render_layout(f: &mut Frame, area: Rect, view: &DashboardView) {
    let chunks = RatLayout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Counters
            Constraint::Min(0),    // Tables
            Constraint::Length(3), // Status
        ])
        .split(area);

    render_header(f, chunks[0]);
    render_counters(f, chunks[1], view.analytics.as_ref());

    let tables = RatLayout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(chunks[2]);
    render_pages_table(f, tables[0], view.analytics.as_ref());
    render_events_table(f, tables[1], view.analytics.as_ref());

    render_footer(f, chunks[3], view);
}

fn render_header(f: &mut Frame, area: Rect) {
    let text = vec![Line::from(vec![
        Span::styled("chainscope", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" - Live dApp Analytics   "),
        Span::styled("q/Esc to quit", Style::default().fg(Color::DarkGray)),
    ])];

    f.render_widget(Paragraph::new(text).block(Block::default().borders(Borders::ALL)), area);
}

fn counter(label: &str, value: u64) -> Vec<Span<'static>> {
    vec![
        Span::styled(format!("{}: ", label), Style::default().fg(Color::Cyan)),
        Span::styled(value.to_string(), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("   "),
    ]
}

fn render_counters(f: &mut Frame, area: Rect, analytics: Option<&RealTimeAnalytics>) {
    let line = match analytics {
        Some(a) => Line::from(
            [
                counter("Active users", a.active_users),
                counter("Active sessions", a.active_sessions),
                counter("Tx (1h)", a.transactions_in_last_hour),
                counter("Events (1h)", a.events_in_last_hour),
            ]
            .concat(),
        ),
        None => Line::from(Span::raw("Waiting for first refresh...")),
    };

    f.render_widget(
        Paragraph::new(vec![line]).block(Block::default().borders(Borders::ALL).title("Right now")),
        area,
    );
}

fn render_pages_table(f: &mut Frame, area: Rect, analytics: Option<&RealTimeAnalytics>) {
    let header = Row::new(vec!["Page", "Users"])
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = analytics
        .map(|a| {
            a.top_current_pages
                .iter()
                .map(|p| Row::new(vec![p.url.clone(), p.users.to_string()]))
                .collect()
        })
        .unwrap_or_default();

    let table = Table::new(rows, [Constraint::Min(10), Constraint::Length(6)])
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Top Pages"));
    f.render_widget(table, area);
}

fn render_events_table(f: &mut Frame, area: Rect, analytics: Option<&RealTimeAnalytics>) {
    let header = Row::new(vec!["Time", "Kind", "Event", "Wallet"])
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = analytics
        .map(|a| {
            a.recent_events
                .iter()
                .map(|event| {
                    let color = if event.kind() == "contract" {
                        Color::Green
                    } else {
                        Color::White
                    };
                    Row::new(event_row(event).to_vec()).style(Style::default().fg(color))
                })
                .collect()
        })
        .unwrap_or_default();

    let widths = [
        Constraint::Length(10), // Time
        Constraint::Length(9),  // Kind
        Constraint::Min(20),    // Event
        Constraint::Length(14), // Wallet
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Recent Events"));
    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, area: Rect, view: &DashboardView) {
    let mut spans = vec![
        Span::styled("Store: ", Style::default().fg(Color::Green)),
        Span::raw(view.backend.unwrap_or("memory")),
        Span::raw(" | "),
        Span::styled("Fallbacks: ", Style::default().fg(Color::Cyan)),
        Span::raw(view.fallback_count.to_string()),
    ];
    if let Some(a) = &view.analytics {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled("Updated: ", Style::default().fg(Color::Cyan)));
        spans.push(Span::raw(format_time(a.generated_at)));
    }
    if let Some(err) = &view.last_error {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(err.clone(), Style::default().fg(Color::Red)));
    }

    f.render_widget(
        Paragraph::new(vec![Line::from(spans)])
            .block(Block::default().borders(Borders::ALL).title("Status")),
        area,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::PageActivity;
    use chrono::Utc;
    use ratatui::{backend::TestBackend, Terminal};

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_renders_counters_and_pages() {
        let view = DashboardView {
            analytics: Some(RealTimeAnalytics {
                active_users: 7,
                active_sessions: 3,
                transactions_in_last_hour: 2,
                events_in_last_hour: 11,
                top_current_pages: vec![PageActivity {
                    url: "/home".to_string(),
                    users: 2,
                }],
                recent_events: Vec::new(),
                generated_at: Utc::now(),
            }),
            backend: Some("sqlite"),
            ..Default::default()
        };

        let mut terminal = Terminal::new(TestBackend::new(120, 20)).unwrap();
        terminal
            .draw(|f| {
                let area = f.size();
                render_layout(f, area, &view)
            })
            .unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("Active users: 7"));
        assert!(text.contains("/home"));
        assert!(text.contains("sqlite"));
    }

    #[test]
    fn test_renders_placeholder_before_first_refresh() {
        let mut terminal = Terminal::new(TestBackend::new(80, 16)).unwrap();
        terminal
            .draw(|f| {
                let area = f.size();
                render_layout(f, area, &DashboardView::default())
            })
            .unwrap();
        assert!(buffer_text(&terminal).contains("Waiting for first refresh"));
    }
}
