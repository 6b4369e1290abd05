use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::{prelude::*, widgets::*};

use crate::Pose;
use crate::jog::JogView;
use crate::keys::{HeldKeys, JogKey};
use crate::pose::Axis;

const TITLE: &str = "Manual control (←/→: X, ↑/↓: Y, W/S: Z, A/D: R, q: Quit)";

fn axis_keys(axis: Axis) -> [JogKey; 2] {
    match axis {
        Axis::X => [JogKey::Left, JogKey::Right],
        Axis::Y => [JogKey::Down, JogKey::Up],
        Axis::Z => [JogKey::S, JogKey::W],
        Axis::R => [JogKey::A, JogKey::D],
    }
}

pub fn ui(f: &mut Frame, pose: &Pose, held: HeldKeys) {
    let area = f.area();

    let header = Row::new(vec![
        Cell::from("Axis"),
        Cell::from("Position"),
        Cell::from("Unit"),
        Cell::from("Keys"),
    ])
    .style(Style::default().fg(Color::Yellow).bold());

    let rows: Vec<Row> = Axis::ALL
        .iter()
        .map(|&axis| {
            let keys = axis_keys(axis);
            let moving = keys.iter().any(|key| held.is_held(*key));
            let row = Row::new(vec![
                Cell::from(axis.label()),
                Cell::from(format!("{:8.1}", pose.axis(axis))),
                Cell::from(axis.unit()),
                Cell::from(format!("{} {}", keys[0].label(), keys[1].label())),
            ]);

            if moving {
                row.style(Style::default().bg(Color::DarkGray).fg(Color::Green))
            } else {
                row
            }
        })
        .collect();

    let table = Table::new(
        rows,
        vec![
            Constraint::Length(6),  // Axis
            Constraint::Length(10), // Position
            Constraint::Length(6),  // Unit
            Constraint::Length(8),  // Keys
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(TITLE)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    )
    .style(Style::default().fg(Color::White));

    f.render_widget(table, area);
}

/// Jog screen on the alternate screen. Raw mode stays on while this is alive
/// so key events reach the jog loop unbuffered.
pub struct TerminalView {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalView {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(TerminalView { terminal })
    }
}

impl JogView for TerminalView {
    fn draw(&mut self, pose: &Pose, held: HeldKeys) -> io::Result<()> {
        self.terminal.draw(|f| ui(f, pose, held))?;
        Ok(())
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
