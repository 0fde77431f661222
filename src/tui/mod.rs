mod help;
mod state;

use crate::cli::{build_config, open_user_name_store, Cli};
use crate::engine::CommandDispatcher;
use crate::model::Command;
use crate::orchestrator::ServerPanel;
use crate::registry::DeliveryQueue;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Terminal,
};
use state::UiState;
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::runtime::Handle;
use tracing::info;

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let dispatcher = Arc::new(CommandDispatcher::new(&cfg)?);
    let store = Arc::new(open_user_name_store(&args)?);

    // The panel spawns its work on this runtime; deliveries run on the UI thread.
    let (panel, queue) = ServerPanel::<UiState>::new(dispatcher, store, Handle::current());

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_args, panel, queue));

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    match join_res {
        Ok(Ok(res)) => res,
        Ok(Err(_)) => Err(anyhow::anyhow!("TUI thread panicked")),
        Err(e) => Err(anyhow::anyhow!("TUI join failed: {e}")),
    }
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    mut panel: ServerPanel<UiState>,
    mut queue: DeliveryQueue<UiState>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState::default();
    attach(&mut panel, &mut state);
    if args.health_on_launch {
        issue(&panel, &mut state, Command::HealthCheck);
    }
    info!(base_url = %args.base_url, "screen opened");

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Run callbacks of finished operations without blocking the render loop.
        queue.try_deliver(&mut state);

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if state.editing {
                    handle_edit_key(&panel, &mut state, k.code);
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        break Ok(());
                    }
                    (_, KeyCode::Char('h')) => issue(&panel, &mut state, Command::HealthCheck),
                    (_, KeyCode::Char('s')) => issue(&panel, &mut state, Command::Start),
                    (_, KeyCode::Char('x')) => issue(&panel, &mut state, Command::Stop),
                    (_, KeyCode::Char('u')) => {
                        if state.can_update_user_name() {
                            state.editing = true;
                            state.input = state.user_name.clone();
                        } else {
                            state.info = "User name update in progress…".into();
                        }
                    }
                    (_, KeyCode::Char('p')) => {
                        if panel.is_attached() {
                            let cancelled = panel.pending();
                            panel.detach();
                            state.detached(cancelled);
                        } else {
                            attach(&mut panel, &mut state);
                        }
                    }
                    (_, KeyCode::Esc) => {
                        if let Some(update) = state.update_pending.take() {
                            if panel.cancel(&update) {
                                state.info = "User name update cancelled".into();
                            }
                        }
                    }
                    (_, KeyCode::Char('?')) => {
                        state.show_help = !state.show_help;
                    }
                    _ => {}
                }
            }
        }
    };

    // Screen teardown: nothing started by this screen may reach it afterwards.
    panel.detach();
    info!("screen closed");

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn attach(panel: &mut ServerPanel<UiState>, state: &mut UiState) {
    panel.attach();
    state.attached = true;
    state.info = "Attached".into();
}

fn issue(panel: &ServerPanel<UiState>, state: &mut UiState, command: Command) {
    match command {
        Command::HealthCheck => panel.refresh_status(),
        Command::Start => panel.start_server(),
        Command::Stop => panel.stop_server(),
    };
    state.command_issued(command);
}

fn handle_edit_key(panel: &ServerPanel<UiState>, state: &mut UiState, code: KeyCode) {
    match code {
        KeyCode::Enter => {
            state.editing = false;
            let name = std::mem::take(&mut state.input);
            state.update_pending = Some(panel.update_user_name(name));
            state.info = "Updating user name…".into();
        }
        KeyCode::Esc => {
            state.editing = false;
            state.input.clear();
        }
        KeyCode::Backspace => {
            state.input.pop();
        }
        KeyCode::Char(c) => state.input.push(c),
        _ => {}
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(5),    // Server status
                Constraint::Length(3), // User name
                Constraint::Length(3), // Input / shortcuts
                Constraint::Length(3), // Info line
            ]
            .as_ref(),
        )
        .split(area);

    if state.show_help {
        draw_help(area, f);
        return;
    }

    draw_status(chunks[0], f, state);

    let user = Paragraph::new(Line::from(vec![
        Span::styled("User: ", Style::default().fg(Color::Gray)),
        Span::styled(
            if state.user_name.is_empty() {
                "-".to_string()
            } else {
                state.user_name.clone()
            },
            Style::default().fg(Color::Cyan),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title("User name"));
    f.render_widget(user, chunks[1]);

    let input = if state.editing {
        Paragraph::new(Line::from(vec![
            Span::raw(state.input.clone()),
            Span::styled("█", Style::default().fg(Color::Yellow)),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("New user name (Enter to save, Esc to discard)"),
        )
    } else {
        let update_style = if state.can_update_user_name() {
            Style::default().fg(Color::Magenta)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        Paragraph::new(Line::from(vec![
            Span::styled("h", Style::default().fg(Color::Magenta)),
            Span::raw(" health  "),
            Span::styled("s", Style::default().fg(Color::Magenta)),
            Span::raw(" start  "),
            Span::styled("x", Style::default().fg(Color::Magenta)),
            Span::raw(" stop  "),
            Span::styled("u", update_style),
            Span::raw(" user name  "),
            Span::styled("p", Style::default().fg(Color::Magenta)),
            Span::raw(if state.attached { " detach  " } else { " attach  " }),
            Span::styled("?", Style::default().fg(Color::Magenta)),
            Span::raw(" help  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" quit"),
        ]))
        .block(Block::default().borders(Borders::ALL).title("Keyboard Shortcuts"))
    };
    f.render_widget(input, chunks[2]);

    let info = Paragraph::new(state.info.clone())
        .block(Block::default().borders(Borders::ALL).title("Info"));
    f.render_widget(info, chunks[3]);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let color = match state.status_ok {
        Some(true) => Color::Green,
        Some(false) => Color::Red,
        None => Color::Gray,
    };
    let mut lines = vec![Line::from(Span::styled(
        if state.server_status.is_empty() {
            "No status yet".to_string()
        } else {
            state.server_status.clone()
        },
        Style::default().fg(color),
    ))];
    lines.push(Line::from(""));
    if let (Some(cmd), Some(at)) = (state.last_command, state.last_updated.as_deref()) {
        lines.push(Line::from(vec![
            Span::styled("Last: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{cmd} at {at}")),
        ]));
    }
    if !state.in_flight.is_empty() {
        let pending: Vec<String> = state.in_flight.iter().map(|c| c.to_string()).collect();
        lines.push(Line::from(vec![
            Span::styled("Pending: ", Style::default().fg(Color::Gray)),
            Span::styled(pending.join(", "), Style::default().fg(Color::Yellow)),
        ]));
    }
    if !state.attached {
        lines.push(Line::from(Span::styled(
            "Detached",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("server-manager-cli"));
    f.render_widget(p, area);
}
