//! Node-level error types and the error-kind classifier shared with the
//! recovery layer (`engine::recovery`).
//!
//! The engine uses the variant / kind to decide retry behaviour:
//! - `Retryable` / `Classified` — routed through `engine::recovery`'s
//!   per-[`ErrorKind`] policy table.
//! - `Fatal` — the execution is immediately marked as failed, bypassing
//!   recovery entirely.

use thiserror::Error;

/// The coarse category a failure falls into, used to look up a default
/// [`crate`]-agnostic recovery policy. Classification is a case-insensitive
/// substring match over the error message (see [`classify`]), except for
/// `Validation` and `Quota`, which callers set explicitly when they already
/// know the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Resource,
    Permission,
    Configuration,
    Data,
    Dependency,
    Execution,
    Validation,
    Quota,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Resource => "resource",
            Self::Permission => "permission",
            Self::Configuration => "configuration",
            Self::Data => "data",
            Self::Dependency => "dependency",
            Self::Execution => "execution",
            Self::Validation => "validation",
            Self::Quota => "quota",
        };
        write!(f, "{s}")
    }
}

/// Classify a free-text error message into an [`ErrorKind`].
///
/// Checked in order; the first matching keyword wins. Falls back to
/// `Execution` when nothing matches. `Validation` and `Quota` are never
/// produced here — callers raise them explicitly via
/// [`NodeError::Classified`].
pub fn classify(message: &str) -> ErrorKind {
    let m = message.to_ascii_lowercase();

    const NETWORK: &[&str] = &["connection", "network", "dns", "socket", "http"];
    const TIMEOUT: &[&str] = &["timeout"];
    const RESOURCE: &[&str] = &["memory", "disk", "resource", "limit", "quota"];
    const PERMISSION: &[&str] = &["permission", "unauthorized", "forbidden", "access"];
    const CONFIGURATION: &[&str] = &["config", "configuration", "missing", "invalid"];
    const DATA: &[&str] = &["json", "parse", "format", "decode", "encode"];
    const DEPENDENCY: &[&str] = &["import", "module", "dependency", "not found"];

    // Order matters: "timeout" is checked ahead of "network" even though
    // neither list overlaps today, to mirror the documented precedence.
    if NETWORK.iter().any(|k| m.contains(k)) {
        ErrorKind::Network
    } else if TIMEOUT.iter().any(|k| m.contains(k)) {
        ErrorKind::Timeout
    } else if RESOURCE.iter().any(|k| m.contains(k)) {
        ErrorKind::Resource
    } else if PERMISSION.iter().any(|k| m.contains(k)) {
        ErrorKind::Permission
    } else if CONFIGURATION.iter().any(|k| m.contains(k)) {
        ErrorKind::Configuration
    } else if DATA.iter().any(|k| m.contains(k)) {
        ErrorKind::Data
    } else if DEPENDENCY.iter().any(|k| m.contains(k)) {
        ErrorKind::Dependency
    } else {
        ErrorKind::Execution
    }
}

/// Errors returned by a node's `execute` method.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// Transient failure; the recovery layer decides whether and how to
    /// retry based on the classified [`ErrorKind`] of the message.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted, ever.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// A failure whose kind the node already knows (e.g. a validation
    /// failure before any I/O happened, or a provider-reported quota
    /// error) — skips the keyword classifier.
    #[error("{kind} error: {message}")]
    Classified { kind: ErrorKind, message: String },
}

impl NodeError {
    /// The [`ErrorKind`] this error should be classified as by the
    /// recovery layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Retryable(msg) | NodeError::Fatal(msg) => classify(msg),
            NodeError::Classified { kind, .. } => *kind,
        }
    }

    /// The human-readable message, regardless of variant.
    pub fn message(&self) -> &str {
        match self {
            NodeError::Retryable(m) | NodeError::Fatal(m) => m,
            NodeError::Classified { message, .. } => message,
        }
    }

    /// Whether this variant bypasses recovery policy entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NodeError::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_before_generic_fallback() {
        assert_eq!(classify("connection refused"), ErrorKind::Network);
        assert_eq!(classify("dns lookup failed"), ErrorKind::Network);
    }

    #[test]
    fn classifies_timeout() {
        assert_eq!(classify("operation Timeout after 3s"), ErrorKind::Timeout);
    }

    #[test]
    fn classifies_data_errors() {
        assert_eq!(classify("invalid JSON payload"), ErrorKind::Data);
        assert_eq!(classify("failed to decode response"), ErrorKind::Data);
    }

    #[test]
    fn falls_back_to_execution() {
        assert_eq!(classify("division by zero"), ErrorKind::Execution);
    }

    #[test]
    fn classified_variant_skips_keyword_matching() {
        let err = NodeError::Classified {
            kind: ErrorKind::Validation,
            message: "connection string missing".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
