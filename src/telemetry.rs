//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Registers the global tracing subscriber for the service.
///
/// Verbosity comes from `RUST_LOG`, defaulting to `info`. Construction is
/// idempotent only in the sense that a second registration is ignored with a
/// warning, which keeps tests that build multiple services harmless.
pub struct Telemetry {
    name: &'static str,
    version: &'static str,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Start a registration with empty identity fields.
    pub fn new() -> Self {
        Self {
            name: "vault0",
            version: "0.0.0",
        }
    }

    /// Set the service name reported on startup.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set the service version reported on startup.
    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Install the subscriber.
    pub fn register(self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registered = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        match registered {
            Ok(()) => {
                tracing::info!(service = self.name, version = self.version, "telemetry registered");
            }
            Err(_) => {
                tracing::warn!("telemetry already registered, keeping the existing subscriber");
            }
        }
    }
}
