//! Target name expansion
//!
//! Placeholders recognized in a destination's `name_pattern`:
//!
//! | Placeholder     | Value                                  |
//! |-----------------|----------------------------------------|
//! | `{destination}` | destination id                         |
//! | `{sink_id}`     | sink key allocated at open             |
//! | `{grid_id}`     | grid id from the export params, or ``  |
//! | `{date}`        | open date, `YYYYMMDD` (UTC)            |
//! | `{timestamp}`   | open time, `YYYYMMDDHHMMSS` (UTC)      |
//! | `{part}`        | part number, starting at 1             |
//! | `{ext}`         | format extension without the dot       |
//!
//! Unknown placeholders are left as they are. The timestamp is taken once at
//! open, so every part of an export shares it.

use crate::domain::{DestinationId, SinkId};
use chrono::{DateTime, Utc};

/// Expands names for every part of one export
#[derive(Debug, Clone)]
pub struct PartNamer {
    expanded: String,
    has_part: bool,
}

impl PartNamer {
    pub fn new(
        pattern: &str,
        destination: &DestinationId,
        sink_id: SinkId,
        grid_id: Option<&str>,
        opened_at: DateTime<Utc>,
        extension: &str,
    ) -> Self {
        let expanded = pattern
            .replace("{destination}", destination.as_str())
            .replace("{sink_id}", &sink_id.to_string())
            .replace("{grid_id}", grid_id.unwrap_or_default())
            .replace("{date}", &opened_at.format("%Y%m%d").to_string())
            .replace("{timestamp}", &opened_at.format("%Y%m%d%H%M%S").to_string())
            .replace("{ext}", extension);
        Self {
            has_part: expanded.contains("{part}"),
            expanded,
        }
    }

    /// Name of part `part` (1-based)
    ///
    /// Without a `{part}` placeholder the first part keeps the plain name and
    /// later parts get `_N` inserted before the extension.
    pub fn part_name(&self, part: u32) -> String {
        if self.has_part {
            return self.expanded.replace("{part}", &part.to_string());
        }
        if part <= 1 {
            return self.expanded.clone();
        }

        let file_start = self.expanded.rfind('/').map_or(0, |i| i + 1);
        match self.expanded[file_start..].rfind('.') {
            Some(dot) if dot > 0 => {
                let dot = file_start + dot;
                format!("{}_{part}{}", &self.expanded[..dot], &self.expanded[dot..])
            }
            _ => format!("{}_{part}", self.expanded),
        }
    }
}
