use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log output settings for binaries that drive generators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"info"` or
    /// `"stampede=debug,warn"`.
    pub level: String,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            ansi: true,
        }
    }
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs a global fmt subscriber. Returns false when one was already
/// installed; the existing one is kept.
pub fn init(cfg: &LogConfig) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(cfg.filter())
        .with_ansi(cfg.ansi)
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!("tracing subscriber already installed");
    }
    installed
}
