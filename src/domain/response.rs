//! Structured export responses
//!
//! Business callers get an [`ExportResponse`] with a numeric code instead of
//! an error. Record-level skips never show up here.

use super::errors::ConduitError;
use super::ids::SinkId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric outcome code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ResponseCode {
    Ok,
    NoData,
    Configuration,
    Duplicate,
    Sequencing,
    Destination,
    Persistence,
    Delivery,
    Internal,
}

impl ResponseCode {
    /// Wire value of the code
    pub fn as_u16(&self) -> u16 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::NoData => 1,
            ResponseCode::Configuration => 10,
            ResponseCode::Duplicate => 11,
            ResponseCode::Sequencing => 12,
            ResponseCode::Destination => 20,
            ResponseCode::Persistence => 30,
            ResponseCode::Delivery => 40,
            ResponseCode::Internal => 99,
        }
    }

    /// Whether the operation counts as successful
    ///
    /// `NoData` is successful: there was simply nothing to export.
    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseCode::Ok | ResponseCode::NoData)
    }
}

impl From<ResponseCode> for u16 {
    fn from(code: ResponseCode) -> Self {
        code.as_u16()
    }
}

impl TryFrom<u16> for ResponseCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseCode::Ok),
            1 => Ok(ResponseCode::NoData),
            10 => Ok(ResponseCode::Configuration),
            11 => Ok(ResponseCode::Duplicate),
            12 => Ok(ResponseCode::Sequencing),
            20 => Ok(ResponseCode::Destination),
            30 => Ok(ResponseCode::Persistence),
            40 => Ok(ResponseCode::Delivery),
            99 => Ok(ResponseCode::Internal),
            other => Err(format!("Unknown response code {other}")),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

impl From<&ConduitError> for ResponseCode {
    fn from(err: &ConduitError) -> Self {
        match err {
            ConduitError::Configuration(_)
            | ConduitError::FormatUnspecified(_)
            | ConduitError::FormatMismatch { .. }
            | ConduitError::Unsupported(_) => ResponseCode::Configuration,
            ConduitError::DuplicateExport(_) => ResponseCode::Duplicate,
            ConduitError::Sequencing(_) => ResponseCode::Sequencing,
            ConduitError::Destination(_) | ConduitError::Io(_) => ResponseCode::Destination,
            ConduitError::Persistence(_) | ConduitError::Bucket(_) => ResponseCode::Persistence,
            ConduitError::Delivery(_) => ResponseCode::Delivery,
            ConduitError::Transformation(_)
            | ConduitError::Serialization(_)
            | ConduitError::Other(_) => ResponseCode::Internal,
        }
    }
}

/// Aggregate result of an export operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResponse {
    pub code: ResponseCode,
    pub message: String,
    pub sink_id: Option<SinkId>,
    pub records_exported: u64,
}

impl ExportResponse {
    /// Successful export
    pub fn ok(sink_id: SinkId, records_exported: u64) -> Self {
        Self {
            code: ResponseCode::Ok,
            message: format!("Exported {records_exported} records"),
            sink_id: Some(sink_id),
            records_exported,
        }
    }

    /// Nothing to export
    pub fn no_data(message: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::NoData,
            message: message.into(),
            sink_id: None,
            records_exported: 0,
        }
    }

    /// Whether the response signals success
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

impl From<ConduitError> for ExportResponse {
    fn from(err: ConduitError) -> Self {
        Self {
            code: ResponseCode::from(&err),
            message: err.to_string(),
            sink_id: None,
            records_exported: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_values() {
        assert_eq!(ResponseCode::Ok.as_u16(), 0);
        assert_eq!(ResponseCode::Duplicate.as_u16(), 11);
        assert_eq!(ResponseCode::Internal.as_u16(), 99);
        assert_eq!(ResponseCode::try_from(40).unwrap(), ResponseCode::Delivery);
        assert!(ResponseCode::try_from(7).is_err());
    }

    #[test]
    fn test_error_mapping() {
        let resp = ExportResponse::from(ConduitError::FormatUnspecified("x".to_string()));
        assert_eq!(resp.code, ResponseCode::Configuration);
        assert!(resp.message.contains("format unspecified"));
        assert!(!resp.is_ok());

        let resp = ExportResponse::from(ConduitError::DuplicateExport("a.csv".to_string()));
        assert_eq!(resp.code, ResponseCode::Duplicate);
    }

    #[test]
    fn test_no_data_is_ok() {
        assert!(ExportResponse::no_data("empty bucket").is_ok());
    }

    #[test]
    fn test_code_serializes_numeric() {
        let resp = ExportResponse::ok(SinkId::new(3), 12);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["records_exported"], 12);
    }
}
