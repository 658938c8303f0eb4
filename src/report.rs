//! Row-oriented output for operators: CSV with a header row, or JSON lines.

use serde::Serialize;
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ReportFormat::Csv),
            "json" | "jsonl" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_line(cells: &[String]) -> String {
    cells
        .iter()
        .map(|c| csv_quote(c))
        .collect::<Vec<_>>()
        .join(",")
}

/// Writes the header followed by one line per row.
pub fn write_csv<W: Write>(out: &mut W, header: &[String], rows: &[Vec<String>]) -> std::io::Result<()> {
    writeln!(out, "{}", csv_line(header))?;
    for row in rows {
        writeln!(out, "{}", csv_line(row))?;
    }
    out.flush()
}

pub fn write_json_lines<W: Write, T: Serialize>(out: &mut W, rows: &[T]) -> std::io::Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        writeln!(out)?;
    }
    out.flush()
}
