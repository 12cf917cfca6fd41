//! Dispatcher configuration

use serde::Deserialize;

/// Tunables for a `Dispatcher`. Deserializable so services can embed it in
/// their TOML config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatcherConfig {
    /// Treat 403 Forbidden like 401 Unauthorized (re-authorize and replay).
    #[serde(default)]
    pub also_intercept_forbidden: bool,
}
