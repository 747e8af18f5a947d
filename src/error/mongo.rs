use std::fmt;

use serde::{Deserialize, Serialize};

use super::kinds::{CURSOR_NOT_FOUND_CODE, CursorError};

/// Structured error information extracted from cursor and driver errors.
///
/// This is intended to be serialized to JSON and consumed by other
/// components (e.g. logging, APIs).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) details: Option<ErrorDetails>,
}

/// Cursor identity attached to errors that concern a specific server cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(rename = "cursorId", skip_serializing_if = "Option::is_none")]
    pub(crate) cursor_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) address: Option<String>,
}

impl ErrorInfo {
    /// Convert error info to pretty-printed JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Convert error info to compact JSON string (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Single-line JSON for log fields, falling back to the bare message.
    pub fn summary(&self) -> String {
        self.to_json_compact()
            .unwrap_or_else(|_| self.message.clone().unwrap_or_default())
    }

    /// Error type tag, e.g. `cursor.network_error`.
    pub fn error_type(&self) -> Option<&str> {
        self.error_type.as_deref()
    }

    /// Server error code, if any.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Extract structured information from a [`CursorError`].
    pub fn from_cursor_error(error: &CursorError) -> Self {
        let mut info = ErrorInfo::default();

        match error {
            CursorError::Network(e) => {
                info.error_type = Some("cursor.network_error".to_string());
                info.message = Some(e.message.clone());
                info.details = e.address.as_ref().map(|address| ErrorDetails {
                    cursor_id: None,
                    address: Some(address.to_string()),
                });
            }
            CursorError::Command(e) => {
                info.error_type = Some("cursor.command_error".to_string());
                info.code = Some(e.code);
                info.name = get_error_name(e.code).or_else(|| {
                    (!e.code_name.is_empty()).then(|| e.code_name.clone())
                });
                info.message = Some(e.message.clone());
            }
            CursorError::CursorNotFound { cursor_id, address } => {
                info.error_type = Some("cursor.cursor_not_found".to_string());
                info.code = Some(CURSOR_NOT_FOUND_CODE);
                info.name = get_error_name(CURSOR_NOT_FOUND_CODE);
                info.message = Some(error.to_string());
                info.details = Some(ErrorDetails {
                    cursor_id: Some(*cursor_id),
                    address: Some(address.to_string()),
                });
            }
            CursorError::Timeout(e) => {
                info.error_type = Some("cursor.timeout".to_string());
                info.message = Some(e.to_string());
            }
            CursorError::Cancelled(msg) => {
                info.error_type = Some("cursor.cancelled".to_string());
                info.message = Some(msg.clone());
            }
            CursorError::MongoDb(e) => return extract_error_info(e),
            _ => {
                // Contract and configuration errors carry no server context.
                info.error_type = Some("cursor.client_error".to_string());
                info.message = Some(error.to_string());
            }
        }

        info
    }
}

/// Format MongoDB driver errors as pretty JSON wrapped in an `error` field.
///
/// Intended to be used by the parent module's `Display` implementation for
/// `CursorError::MongoDb`.
pub fn format_cursor_error(
    f: &mut fmt::Formatter<'_>,
    error: &mongodb::error::Error,
) -> fmt::Result {
    let info = extract_error_info(error);

    let wrapper = serde_json::json!({ "error": info });

    let json_output = serde_json::to_string_pretty(&wrapper).map_err(|_| fmt::Error)?;
    write!(f, "\n{json_output}")
}

/// Extract structured information from a driver error raised while running a
/// cursor command.
pub fn extract_error_info(error: &mongodb::error::Error) -> ErrorInfo {
    use mongodb::error::ErrorKind;

    let mut info = ErrorInfo {
        message: Some(error.to_string()),
        ..ErrorInfo::default()
    };

    match error.kind.as_ref() {
        ErrorKind::Command(command_error) => {
            info.error_type = Some("mongo.command_error".to_string());
            info.code = Some(command_error.code);
            info.name = get_error_name(command_error.code)
                .or_else(|| Some(command_error.code_name.clone()).filter(|n| !n.is_empty()));
            info.message = Some(command_error.message.clone());
        }
        ErrorKind::Io(io_error) => {
            info.error_type = Some("mongo.network_error".to_string());
            info.message = Some(io_error.to_string());
        }
        ErrorKind::ServerSelection { message, .. } => {
            info.error_type = Some("mongo.server_selection_error".to_string());
            info.message = Some(message.clone());
        }
        _ => {
            if error.contains_label("NetworkError") {
                info.error_type = Some("mongo.network_error".to_string());
            }
        }
    }

    info
}

/// Get a human-readable error name from a MongoDB error code.
fn get_error_name(code: i32) -> Option<String> {
    let name = match code {
        CURSOR_NOT_FOUND_CODE => "CursorNotFound",
        50 => "MaxTimeMSExpired",
        96 => "OperationFailed",
        136 => "CappedPositionLost",
        175 => "QueryPlanKilled",
        237 => "CursorKilled",
        _ => return None,
    };

    Some(name.to_string())
}
