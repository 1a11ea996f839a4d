use thiserror::Error;

/// Localnet error types
#[derive(Error, Debug)]
pub enum LocalnetError {
    /// OS-level allocation or configuration failure (namespace, subprocess,
    /// socket, link operation)
    #[error("Resource error: {0}")]
    Resource(String),

    /// Expected bridge, segment or binary is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A link was found by name but it is not a bridge
    #[error("Not a bridge: {0}")]
    NotABridge(String),

    /// A segment has no interfaces left to hand out
    #[error("No interfaces left on bridge {0}")]
    LeasesExhausted(String),

    /// Lifecycle operation invoked in the wrong cluster state
    #[error("Invalid cluster state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Operation on a network namespace handle that was already closed
    #[error("Network namespace handle is closed")]
    NamespaceClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LocalnetError {
    /// Build a `Resource` error from the last OS error, naming the operation.
    pub fn last_os_error(op: impl std::fmt::Display) -> Self {
        LocalnetError::Resource(format!("{}: {}", op, std::io::Error::last_os_error()))
    }
}

impl From<serde_json::Error> for LocalnetError {
    fn from(err: serde_json::Error) -> Self {
        LocalnetError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for LocalnetError {
    fn from(err: serde_yaml::Error) -> Self {
        LocalnetError::Serialization(err.to_string())
    }
}

/// Result type alias for localnet operations
pub type Result<T> = std::result::Result<T, LocalnetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_error_display() {
        let error = LocalnetError::Resource("unshare(CLONE_NEWNET) failed".to_string());
        assert_eq!(
            error.to_string(),
            "Resource error: unshare(CLONE_NEWNET) failed"
        );
    }

    #[test]
    fn test_not_found_error_display() {
        let error = LocalnetError::NotFound("bridge br7".to_string());
        assert_eq!(error.to_string(), "Not found: bridge br7");
    }

    #[test]
    fn test_not_a_bridge_error_display() {
        let error = LocalnetError::NotABridge("lo".to_string());
        assert_eq!(error.to_string(), "Not a bridge: lo");
    }

    #[test]
    fn test_leases_exhausted_display() {
        let error = LocalnetError::LeasesExhausted("br0".to_string());
        assert_eq!(error.to_string(), "No interfaces left on bridge br0");
    }

    #[test]
    fn test_invalid_state_display() {
        let error = LocalnetError::InvalidState {
            expected: "ready",
            actual: "destroyed",
        };
        assert_eq!(
            error.to_string(),
            "Invalid cluster state: expected ready, found destroyed"
        );
    }

    #[test]
    fn test_namespace_closed_display() {
        assert_eq!(
            LocalnetError::NamespaceClosed.to_string(),
            "Network namespace handle is closed"
        );
    }

    #[test]
    fn test_last_os_error_names_operation() {
        let error = LocalnetError::last_os_error("SIOCGIFINDEX br0");
        assert!(matches!(error, LocalnetError::Resource(_)));
        assert!(error.to_string().starts_with("Resource error: SIOCGIFINDEX br0: "));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error: LocalnetError = io_error.into();
        assert!(matches!(error, LocalnetError::Io(_)));
        assert!(error.to_string().contains("no such file"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: LocalnetError = result.unwrap_err().into();
        assert!(matches!(error, LocalnetError::Serialization(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: LocalnetError = result.unwrap_err().into();
        assert!(matches!(error, LocalnetError::Serialization(_)));
    }
}
