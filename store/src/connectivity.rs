//! Connectivity signal.
//!
//! Persisters poll the signal at the moment each change event is delivered;
//! the answer is never cached.

use std::sync::atomic::{AtomicBool, Ordering};

/// Source of the current "connected" status.
pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl<F> Connectivity for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_connected(&self) -> bool {
        self()
    }
}

/// A connectivity flag toggled by the application.
#[derive(Debug)]
pub struct ConnectionStatus {
    connected: AtomicBool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectionStatus {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            tracing::debug!(connected, "Connectivity changed");
        }
    }
}

impl Connectivity for ConnectionStatus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn status_toggles() {
        let status = ConnectionStatus::default();
        assert!(status.is_connected());
        status.set_connected(false);
        assert!(!status.is_connected());
    }

    #[test]
    fn closures_are_signals() {
        let signal: Arc<dyn Connectivity> = Arc::new(|| false);
        assert!(!signal.is_connected());
    }
}
