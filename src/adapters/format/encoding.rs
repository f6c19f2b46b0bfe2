//! Character encodings for text outputs

use crate::domain::{ConduitError, Result};
use std::fmt;
use std::str::FromStr;

/// Supported output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    UsAscii,
    Iso8859_1,
}

impl Encoding {
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::UsAscii => "US-ASCII",
            Encoding::Iso8859_1 => "ISO-8859-1",
        }
    }

    /// Encodes `text`
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Transformation`] for characters the encoding
    /// cannot represent, so the offending record is skipped.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let limit = match self {
            Encoding::Utf8 => return Ok(text.as_bytes().to_vec()),
            Encoding::UsAscii => 0x7F,
            Encoding::Iso8859_1 => 0xFF,
        };

        text.chars()
            .map(|c| {
                let code = c as u32;
                if code <= limit {
                    Ok(code as u8)
                } else {
                    Err(ConduitError::Transformation(format!(
                        "character {c:?} (U+{code:04X}) cannot be encoded as {}",
                        self.label()
                    )))
                }
            })
            .collect()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Encoding {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Ok(Encoding::Utf8),
            "US-ASCII" | "ASCII" => Ok(Encoding::UsAscii),
            "ISO-8859-1" | "LATIN1" | "LATIN-1" => Ok(Encoding::Iso8859_1),
            _ => Err(ConduitError::Configuration(format!(
                "Unsupported encoding '{s}'. Expected UTF-8, US-ASCII or ISO-8859-1"
            ))),
        }
    }
}
