use std::io::{self, Write};

use chrono::{DateTime, Utc};
use crossterm::{
    cursor::MoveTo,
    queue,
    style::Stylize,
    terminal::{Clear, ClearType},
};

use crate::outcome::{CheckOutcome, Health};

/// Renders Up/Down tables for `--output table`.
pub struct TableRenderer {
    writer: Box<dyn Write + Send>,
    color: bool,
    clear_screen: bool,
    show_time: bool,
}

impl TableRenderer {
    /// One-shot table for `check`: URL and status only.
    pub fn for_check(writer: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            writer,
            color,
            clear_screen: false,
            show_time: false,
        }
    }

    /// Redrawn every tick with the time of the check.
    pub fn for_monitor(writer: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            writer,
            color,
            clear_screen: color,
            show_time: true,
        }
    }

    /// # Errors
    ///
    /// Propagates write failures of the underlying writer.
    pub fn render(&mut self, outcomes: &[CheckOutcome]) -> io::Result<()> {
        let mut header = vec!["URL".to_string(), "Status".to_string()];
        if self.show_time {
            header.push("Last Time Checked".to_string());
        }
        let rows: Vec<(Vec<String>, Health)> = outcomes
            .iter()
            .map(|outcome| {
                let health = outcome.health();
                let mut cells = vec![outcome.target.to_string(), health.to_string()];
                if self.show_time {
                    cells.push(format_checked_at(outcome.timestamp));
                }
                (cells, health)
            })
            .collect();

        let mut widths: Vec<usize> = header.iter().map(String::len).collect();
        for (cells, _) in &rows {
            for (width, cell) in widths.iter_mut().zip(cells) {
                *width = (*width).max(cell.chars().count());
            }
        }

        if self.clear_screen {
            queue!(self.writer, Clear(ClearType::All), MoveTo(0, 0))?;
        }
        let border = separator(&widths);
        writeln!(self.writer, "{border}")?;
        writeln!(
            self.writer,
            "{}",
            line(&header, &widths, |_, cell| cell.to_uppercase())
        )?;
        writeln!(self.writer, "{border}")?;
        for (cells, health) in &rows {
            let color = self.color;
            let rendered = line(cells, &widths, |i, cell| {
                if i == 1 && color {
                    paint(&cell, *health)
                } else {
                    cell
                }
            });
            writeln!(self.writer, "{rendered}")?;
        }
        writeln!(self.writer, "{border}")?;
        self.writer.flush()
    }
}

fn format_checked_at(time: DateTime<Utc>) -> String {
    time.format("%m/%d/%Y %I:%M%p").to_string()
}

fn paint(cell: &str, health: Health) -> String {
    match health {
        Health::Up => cell.green().to_string(),
        Health::Down => cell.red().to_string(),
    }
}

fn separator(widths: &[usize]) -> String {
    let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
    format!("+{}+", dashes.join("+"))
}

/// Pads before styling so escape codes do not skew the column widths.
fn line(cells: &[String], widths: &[usize], style: impl Fn(usize, String) -> String) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(i, (cell, width))| {
            let pad = " ".repeat(width - cell.chars().count());
            format!(" {}{pad} ", style(i, cell.clone()))
        })
        .collect();
    format!("|{}|", padded.join("|"))
}
