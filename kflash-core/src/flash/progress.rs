//! Installer output classification.

use crate::config::ProgressMarker;

pub const UI_PRINT: &str = "ui_print";

/// Pipeline milestones and the progress each one stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    Cleaning,
    Copying,
    Extracting,
    Patching,
    Flashing,
    ReadingSlot,
    SwitchingSlot,
    RestoringSlot,
}

impl Milestone {
    pub fn progress(self) -> f32 {
        match self {
            Milestone::Cleaning => 0.10,
            Milestone::Copying => 0.20,
            Milestone::Extracting => 0.40,
            Milestone::Patching => 0.60,
            Milestone::Flashing => 0.70,
            Milestone::ReadingSlot => 0.72,
            Milestone::SwitchingSlot => 0.74,
            Milestone::RestoringSlot => 0.80,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Milestone::Cleaning => "Cleaning working area",
            Milestone::Copying => "Copying package",
            Milestone::Extracting => "Extracting installer",
            Milestone::Patching => "Patching installer",
            Milestone::Flashing => "Flashing",
            Milestone::ReadingSlot => "Reading current slot",
            Milestone::SwitchingSlot => "Switching target slot",
            Milestone::RestoringSlot => "Restoring original slot",
        }
    }
}

/// Drop a leading `ui_print` token (and the whitespace after it).
pub fn strip_ui_print(line: &str) -> &str {
    match line.strip_prefix(UI_PRINT) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim_start(),
        _ => line,
    }
}

/// Case-insensitive keyword matcher over installer output.
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
    markers: Vec<(String, f32)>,
}

impl MarkerSet {
    pub fn new(markers: &[ProgressMarker]) -> Self {
        Self {
            markers: markers
                .iter()
                .filter(|m| !m.keyword.is_empty())
                .map(|m| (m.keyword.to_lowercase(), m.progress.clamp(0.0, 1.0)))
                .collect(),
        }
    }

    /// Highest progress among the markers found in `line`.
    pub fn classify(&self, line: &str) -> Option<f32> {
        let lower = line.to_lowercase();
        self.markers
            .iter()
            .filter(|(keyword, _)| lower.contains(keyword.as_str()))
            .map(|(_, progress)| *progress)
            .reduce(f32::max)
    }
}
