use {
    super::layout::{render_layout, DashboardView},
    crate::service::AnalyticsService,
    ratatui::{backend::CrosstermBackend, Terminal},
    std::{
        sync::Arc,
        time::{Duration, Instant},
    },
};

/// Run the TUI event loop
///
/// Re-queries the real-time view every `refresh` and redraws; keyboard
/// input is polled in between.
pub async fn run_ui(
    service: Arc<AnalyticsService>,
    refresh: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    crossterm::terminal::enable_raw_mode()?;

    // Alternate screen keeps stderr logs off the dashboard
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::cursor::Hide
    )?;
    terminal.clear()?;

    let mut view = DashboardView::default();
    let mut last_refresh: Option<Instant> = None;

    loop {
        if last_refresh.map_or(true, |at| at.elapsed() >= refresh) {
            match service.get_realtime_analytics().await {
                Ok(analytics) => {
                    view.analytics = Some(analytics);
                    view.last_error = None;
                }
                Err(e) => view.last_error = Some(e.to_string()),
            }
            view.backend = service.gateway().durable_backend_type();
            view.fallback_count = service.gateway().fallback_count();
            last_refresh = Some(Instant::now());
        }

        let area = terminal.size()?;
        terminal.draw(|f| render_layout(f, area, &view))?;

        if crossterm::event::poll(Duration::from_millis(250))? {
            if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
                match key.code {
                    crossterm::event::KeyCode::Char('q') | crossterm::event::KeyCode::Esc => break,
                    crossterm::event::KeyCode::Char('r') => last_refresh = None,
                    _ => {}
                }
            }
        }
    }

    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;
    crossterm::terminal::disable_raw_mode()?;
    Ok(())
}
