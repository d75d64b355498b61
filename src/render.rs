//! Plain-text rendering for the terminal front end.

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;

use std::fmt::Write as _;

use crate::net::types::{Day, Lecture, Period, Slot, TimetableSnapshot};

/// Terminal columns per grid cell.
const CELL_WIDTH: usize = 12;

/// Terminal columns for the period label.
const LABEL_WIDTH: usize = 5;

const EMPTY_CELL: &str = "-";

/// Render a snapshot as a period-by-day table.
#[must_use]
pub fn render_grid(snapshot: &TimetableSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&pad("", LABEL_WIDTH));
    for day in Day::ALL {
        let _ = write!(out, "| {} ", pad(day.label(), CELL_WIDTH));
    }
    out.push('\n');
    for period in Period::all() {
        out.push_str(&pad(&period.to_string(), LABEL_WIDTH));
        for day in Day::ALL {
            let cell = snapshot
                .cell(Slot::new(day, period))
                .map_or(EMPTY_CELL, Lecture::display_name);
            let _ = write!(out, "| {} ", pad(cell, CELL_WIDTH));
        }
        out.push('\n');
    }
    out
}

/// One-line summary: id, name, lecturer, then code and time when known.
#[must_use]
pub fn lecture_line(lecture: &Lecture) -> String {
    let mut line = format!("{:>6}  {}", lecture.id, lecture.display_name());
    if !lecture.lecturer_name().is_empty() {
        let _ = write!(line, " / {}", lecture.lecturer_name());
    }
    if let Some(code) = lecture.code.as_deref().filter(|c| !c.is_empty()) {
        let _ = write!(line, " [{code}]");
    }
    if let Some(time) = lecture.time.as_deref().filter(|t| !t.is_empty()) {
        let _ = write!(line, " ({time})");
    }
    line
}

/// Truncate or space-fill `text` to exactly `width` terminal columns.
fn pad(text: &str, width: usize) -> String {
    let mut cell = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = char_width(ch);
        if used + w > width {
            break;
        }
        cell.push(ch);
        used += w;
    }
    cell.extend(std::iter::repeat_n(' ', width - used));
    cell
}

/// Columns a terminal gives `text`.
#[must_use]
pub fn display_width(text: &str) -> usize {
    text.chars().map(char_width).sum()
}

/// East Asian wide and fullwidth blocks take two columns. Combining marks
/// and other zero-width code points are counted as one.
fn char_width(ch: char) -> usize {
    match u32::from(ch) {
        0x1100..=0x115F
        | 0x2E80..=0x303E
        | 0x3041..=0x33FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xA000..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x1F300..=0x1F64F
        | 0x1F900..=0x1F9FF
        | 0x20000..=0x3FFFD => 2,
        _ => 1,
    }
}
