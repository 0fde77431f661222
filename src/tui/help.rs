use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, label: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(label),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        key_line("h", 11, "Check server health"),
        key_line("s", 11, "Start server"),
        key_line("x", 11, "Stop server"),
        key_line("u", 11, "Edit user name"),
        key_line("p", 11, "Detach/attach screen (cancels pending requests)"),
        key_line("Esc", 9, "Cancel a pending user name update"),
        key_line("?", 11, "Show/hide this help"),
        Line::from(""),
        Line::from("Editing user name:"),
        key_line("Enter", 7, "Save"),
        key_line("Esc", 9, "Discard"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
