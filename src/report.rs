//! Table rows for the detection, history and legend views, plus a plain-text renderer.

use serde::Serialize;

use crate::frame::{DetectionRecord, FrameResult};
use crate::history::HistoryEntry;
use crate::labels::LegendEntry;

/// One line of the detection table. Confidence is formatted with two decimals.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionRow {
    pub label: String,
    pub confidence: String,
}

impl From<&DetectionRecord> for DetectionRow {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            label: record.label().to_string(),
            confidence: format!("{:.2}", record.confidence()),
        }
    }
}

pub fn detection_rows(result: &FrameResult) -> Vec<DetectionRow> {
    result.detections().iter().map(DetectionRow::from).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryRow {
    pub sequence: u64,
    pub kind: &'static str,
    pub captured_at_s: u64,
    pub detections: Vec<DetectionRow>,
}

impl From<&HistoryEntry> for HistoryRow {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            sequence: entry.sequence(),
            kind: entry.kind().as_str(),
            captured_at_s: entry.captured_at_s(),
            detections: entry.detections().iter().map(DetectionRow::from).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LegendRow {
    pub label: String,
    pub color: String,
    pub description: String,
}

impl From<&LegendEntry> for LegendRow {
    fn from(entry: &LegendEntry) -> Self {
        Self {
            label: entry.label.clone(),
            color: entry.color.clone(),
            description: entry.description.clone().unwrap_or_default(),
        }
    }
}

/// Render rows as a left-aligned text table with a header rule.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let mut out = String::new();
    push_line(&mut out, headers.iter().map(|h| h.to_string()), &widths);
    push_line(&mut out, widths.iter().map(|w| "-".repeat(*w)), &widths);
    for row in rows {
        push_line(&mut out, row.iter().cloned(), &widths);
    }
    out
}

fn push_line(out: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

pub fn detections_table(rows: &[DetectionRow]) -> String {
    if rows.is_empty() {
        return "No objects detected.\n".to_string();
    }
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|r| vec![r.label.clone(), r.confidence.clone()])
        .collect();
    render_table(&["Label", "Confidence"], &cells)
}

pub fn history_table(rows: &[HistoryRow]) -> String {
    if rows.is_empty() {
        return "History is empty.\n".to_string();
    }
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            let labels = r
                .detections
                .iter()
                .map(|d| format!("{} ({})", d.label, d.confidence))
                .collect::<Vec<_>>()
                .join(", ");
            vec![
                format!("#{}", r.sequence),
                r.kind.to_string(),
                r.captured_at_s.to_string(),
                if labels.is_empty() { "-".to_string() } else { labels },
            ]
        })
        .collect();
    render_table(&["#", "Source", "Captured (unix s)", "Detections"], &cells)
}

pub fn legend_table(rows: &[LegendRow]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|r| vec![r.label.clone(), r.color.clone(), r.description.clone()])
        .collect();
    render_table(&["Label", "Colour", "Description"], &cells)
}
