//! Operator configuration read from the environment.

use crate::crd::DefaultingConfig;

/// Default port of the health and metrics server.
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Process-level settings of the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Name of this pod, used as leader election identity and event reporter instance.
    pub pod_name: Option<String>,
    /// Namespace this pod runs in, where the leader lease lives.
    pub pod_namespace: Option<String>,
    /// Namespace to watch. `None` watches the whole cluster.
    pub watch_namespace: Option<String>,
    /// Relaxes minimum replica counts for test and development deployments.
    pub test_mode: bool,
    /// Port of the health and metrics server.
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: None,
            pod_namespace: None,
            watch_namespace: None,
            test_mode: false,
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

impl OperatorConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which returns the value of a variable if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let test_mode = non_empty("NAUTILUS_TEST_MODE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let health_port = match non_empty("HEALTH_PORT") {
            Some(v) => v.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %v, "Invalid HEALTH_PORT, using default");
                DEFAULT_HEALTH_PORT
            }),
            None => DEFAULT_HEALTH_PORT,
        };

        Self {
            pod_name: non_empty("POD_NAME"),
            pod_namespace: non_empty("POD_NAMESPACE"),
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            test_mode,
            health_port,
        }
    }

    /// Defaulting knobs derived from this configuration.
    pub fn defaulting(&self) -> DefaultingConfig {
        if self.test_mode {
            DefaultingConfig::test_mode()
        } else {
            DefaultingConfig::default()
        }
    }
}
