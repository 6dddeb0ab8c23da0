//! Error types for the places where callers branch on the kind of failure.
//!
//! Everything else propagates as `anyhow::Error`.

use thiserror::Error;

/// Failure talking to a chain node.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Gateway timeouts, connection resets and similar. Retried indefinitely.
    #[error("transient rpc failure: {0}")]
    Transient(String),
    /// The node rejected the request because the batch was too large.
    #[error("rpc batch too large: {0}")]
    BatchTooLarge(String),
    /// The requested block or transaction does not exist on the node.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("failed to decode rpc response: {0}")]
    Decode(String),
    #[error("rpc failure: {0}")]
    Other(String),
}

impl RpcError {
    /// Classify an error message returned by a node or gateway.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("too large") {
            RpcError::BatchTooLarge(message)
        } else if lower.contains("gateway time-out")
            || lower.contains("gateway timeout")
            || lower.contains("bad gateway")
            || lower.contains("service unavailable")
            || lower.contains("timed out")
            || lower.contains("connection reset")
        {
            RpcError::Transient(message)
        } else if lower.contains("not found") {
            RpcError::NotFound(message)
        } else {
            RpcError::Other(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transient(_))
    }
}

/// A transaction selector that matches neither the current nor the legacy format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("unrecognized selector format {0:?}")]
    UnrecognizedSelector(String),
}

/// A mint or burn payload that could not be read.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("transaction {hash} has no {field} field")]
    MissingField { hash: String, field: &'static str },
    #[error("transaction {hash} has an invalid amount {value:?}")]
    InvalidAmount { hash: String, value: String },
}

/// Failure resolving a reference price.
#[derive(Debug, Error)]
pub enum PriceError {
    /// The provider asked us to slow down. The oracle sleeps and retries.
    #[error("price provider throttled the request")]
    Throttled,
    #[error("no price source configured for asset {0}")]
    UnknownAsset(String),
    #[error("invalid prices for {asset} ({eth}, {btc}, {usd})")]
    InvalidPrice {
        asset: String,
        eth: f64,
        btc: f64,
        usd: f64,
    },
    #[error("price provider error: {0}")]
    Provider(String),
}

/// Failure folding an event into a snapshot.
///
/// `InvalidNumber` is a broken invariant: it must stop the process rather than
/// be written to the snapshot table.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("invalid number in field '{field}' of {context}")]
    InvalidNumber {
        field: &'static str,
        context: String,
    },
}

/// Lookup failure on the query surface.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no snapshot exists at or before timestamp {0}")]
    NotFound(i64),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_gateway_timeout_as_transient() {
        let err = RpcError::from_message("Node returned status 504: 504 Gateway Time-out");
        assert!(err.is_transient());
    }

    #[test]
    fn test_classifies_batch_size_errors() {
        let err = RpcError::from_message("request entity too large");
        assert!(matches!(err, RpcError::BatchTooLarge(_)));
    }

    #[test]
    fn test_classifies_missing_transaction() {
        let err = RpcError::from_message("Node returned status 404 with reason: tx abc not found");
        assert!(matches!(err, RpcError::NotFound(_)));
    }

    #[test]
    fn test_unknown_errors_are_not_transient() {
        let err = RpcError::from_message("invalid params");
        assert!(matches!(err, RpcError::Other(_)));
        assert!(!err.is_transient());
    }
}
