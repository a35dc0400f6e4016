//! Operator configuration and well-known metadata keys

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::health::DEFAULT_HEALTH_PORT;

/// Product name used in display titles
pub const PRODUCT_NAME: &str = "AtlasMap";

/// Image repository used when `ATLASMAP_IMAGE` is unset
pub const DEFAULT_IMAGE: &str = "docker.io/atlasmap/atlasmap";

/// Image tag used when neither `spec.version` nor `ATLASMAP_VERSION` is set
pub const DEFAULT_VERSION: &str = "latest";

/// Periodic resync after a successful pass (5 minutes)
pub const DEFAULT_RESYNC_SECS: u64 = 300;

/// Runtime configuration, read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Image repository, without tag
    pub image: String,
    /// Tag used when an AtlasMap leaves `spec.version` empty
    pub default_version: String,
    /// Value of the operator version label on generated objects
    pub operator_version: String,
    /// Restrict the watch to one namespace
    pub watch_namespace: Option<String>,
    pub resync_interval: Duration,
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            default_version: DEFAULT_VERSION.to_string(),
            operator_version: env!("CARGO_PKG_VERSION").to_string(),
            watch_namespace: None,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECS),
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ATLASMAP_IMAGE`: image repository (default: `docker.io/atlasmap/atlasmap`)
    /// - `ATLASMAP_VERSION`: default image tag (default: `latest`)
    /// - `OPERATOR_VERSION`: operator version label (default: crate version)
    /// - `WATCH_NAMESPACE`: namespace to watch (default: all namespaces)
    /// - `RESYNC_INTERVAL_SECONDS`: periodic resync (default: 300)
    /// - `HEALTH_PORT`: health server port (default: 8081)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            image: string_env("ATLASMAP_IMAGE").unwrap_or(defaults.image),
            default_version: string_env("ATLASMAP_VERSION").unwrap_or(defaults.default_version),
            operator_version: string_env("OPERATOR_VERSION").unwrap_or(defaults.operator_version),
            watch_namespace: string_env("WATCH_NAMESPACE"),
            resync_interval: Duration::from_secs(parse_env(
                "RESYNC_INTERVAL_SECONDS",
                DEFAULT_RESYNC_SECS,
            )),
            health_port: parse_env("HEALTH_PORT", defaults.health_port),
        }
    }
}

/// Non-empty value of an environment variable
fn string_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a numeric environment variable, warning and falling back on bad input.
fn parse_env<T>(var_name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match string_env(var_name) {
        Some(v) => match v.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    env_var = var_name,
                    value = %v,
                    error = %e,
                    default = %default,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        None => default,
    }
}

/// Annotations written by the operator
pub mod annotations {
    /// AtlasMap resource version as of the last replica push to the Deployment
    pub const LAST_RECONCILED_RESOURCE_VERSION: &str = "atlasmap.io/atlasmap.resource.version";
}

/// Labels carried by every generated object
pub mod labels {
    pub const NAME: &str = "atlasmap.io/name";
    pub const VERSION: &str = "atlasmap.io/version";
    pub const OPERATOR_VERSION: &str = "atlasmap.io/operator.version";
}

/// Finalizers held on AtlasMap objects
pub mod finalizers {
    /// Keeps the AtlasMap around until its cluster-scoped ConsoleLink is gone
    pub const CONSOLE_LINK_CLEANUP: &str = "atlasmap.io/console-link-cleanup";
}
