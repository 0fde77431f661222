use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Connect or read failure, timeouts included.
    #[error("{details}")]
    Network { details: String, timed_out: bool },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn timeout(details: impl Into<String>) -> Self {
        DispatchError::Network {
            details: format!("request timed out: {}", details.into()),
            timed_out: true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Network { timed_out: true, .. })
    }

    /// Classify a reqwest failure, rendering its full source chain.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let details = render_chain(&err);
        if err.is_decode() {
            return DispatchError::Transport(details);
        }
        if err.is_timeout() || has_timed_out_source(&err) {
            return DispatchError::timeout(details);
        }
        DispatchError::Network {
            details: format!("network error: {details}"),
            timed_out: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

/// Errors that can stand for a cancelled operation. Cancellation is never
/// delivered to an error callback.
pub trait MaybeCancelled: Sized {
    fn cancelled() -> Self;
    fn is_cancelled(&self) -> bool;
}

impl MaybeCancelled for DispatchError {
    fn cancelled() -> Self {
        DispatchError::Cancelled
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }
}

impl MaybeCancelled for StoreError {
    fn cancelled() -> Self {
        StoreError::Cancelled
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let msg = cause.to_string();
        if !out.contains(&msg) {
            out.push_str(": ");
            out.push_str(&msg);
        }
        source = cause.source();
    }
    out
}

fn has_timed_out_source(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_network_error_with_indication() {
        let e = DispatchError::timeout("no response after 60s");
        assert!(e.is_timeout());
        assert!(!e.is_cancelled());
        assert!(e.to_string().contains("timed out"));
    }

    #[test]
    fn cancellation_is_recognized() {
        assert!(DispatchError::Cancelled.is_cancelled());
        assert!(StoreError::Cancelled.is_cancelled());
        let io = StoreError::from(std::io::Error::other("disk full"));
        assert!(!io.is_cancelled());
        assert_eq!(io.to_string(), "io error: disk full");
    }
}
