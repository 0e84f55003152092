//! Error handling for Stemsync
//!
//! Four domain failures: stem loads, rejected playback, tempo/chord
//! detection and cache I/O. Only playback failures reach the user; the
//! rest degrade to a fallback and a log line.

use thiserror::Error;

/// Result type alias for Stemsync operations
pub type Result<T> = std::result::Result<T, StemsyncError>;

/// Main error type for Stemsync operations
#[derive(Error, Debug)]
pub enum StemsyncError {
    // Per-stem errors
    #[error("Stem '{stem_id}' failed to load: {reason}")]
    Load { stem_id: String, reason: String },

    #[error("Playback rejected for stem '{stem_id}': {reason}")]
    Playback { stem_id: String, reason: String },

    #[error("Unknown stem: {stem_id}")]
    UnknownStem { stem_id: String },

    // Analysis errors
    #[error("Detection failed: {reason}")]
    Detection { reason: String },

    // Cache errors
    #[error("Cache error: {reason}")]
    Cache { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StemsyncError {
    pub fn load(stem_id: impl Into<String>, reason: impl Into<String>) -> Self {
        StemsyncError::Load {
            stem_id: stem_id.into(),
            reason: reason.into(),
        }
    }

    pub fn playback(stem_id: impl Into<String>, reason: impl Into<String>) -> Self {
        StemsyncError::Playback {
            stem_id: stem_id.into(),
            reason: reason.into(),
        }
    }

    pub fn detection(reason: impl Into<String>) -> Self {
        StemsyncError::Detection {
            reason: reason.into(),
        }
    }

    pub fn cache(reason: impl Into<String>) -> Self {
        StemsyncError::Cache {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            StemsyncError::Load { .. } => "LOAD_ERROR",
            StemsyncError::Playback { .. } => "PLAYBACK_ERROR",
            StemsyncError::UnknownStem { .. } => "UNKNOWN_STEM",
            StemsyncError::Detection { .. } => "DETECTION_ERROR",
            StemsyncError::Cache { .. } => "CACHE_ERROR",
            StemsyncError::InvalidConfig { .. } => "INVALID_CONFIG",
            StemsyncError::Io(_) => "IO_ERROR",
            StemsyncError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable without user action
    ///
    /// Load errors are scoped to one stem, detection and cache errors
    /// always have a fallback value.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StemsyncError::Load { .. }
                | StemsyncError::Detection { .. }
                | StemsyncError::Cache { .. }
        )
    }

    /// Get the notice shown to the user, if this error is user-visible
    pub fn user_notice(&self) -> Option<String> {
        match self {
            StemsyncError::Playback { .. } => Some(
                "Playback could not start. Tap play again to retry.".to_string(),
            ),
            StemsyncError::Load { stem_id, .. } => {
                Some(format!("Stem '{}' is unavailable and has been muted.", stem_id))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = StemsyncError::load("vocals", "404");
        assert_eq!(err.error_code(), "LOAD_ERROR");
        assert_eq!(
            StemsyncError::playback("drums", "NotAllowedError").error_code(),
            "PLAYBACK_ERROR"
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(StemsyncError::detection("no onsets").is_recoverable());
        assert!(StemsyncError::cache("disk full").is_recoverable());
        assert!(StemsyncError::load("bass", "decode").is_recoverable());
        assert!(!StemsyncError::playback("bass", "blocked").is_recoverable());
    }

    #[test]
    fn test_user_notices() {
        assert!(StemsyncError::playback("bass", "blocked").user_notice().is_some());
        let notice = StemsyncError::load("bass", "404").user_notice().unwrap();
        assert!(notice.contains("bass"));
        assert!(StemsyncError::cache("quota").user_notice().is_none());
        assert!(StemsyncError::detection("silence").user_notice().is_none());
    }

    #[test]
    fn test_display_includes_stem() {
        let err = StemsyncError::load("guitar", "timeout");
        assert_eq!(err.to_string(), "Stem 'guitar' failed to load: timeout");
    }
}
