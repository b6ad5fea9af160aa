// ABOUTME: Provisioning configuration with environment overrides
// ABOUTME: Timeouts, dev-server port and the page origin used for the secure-context check

use devbox_config::constants::{
    DEVBOX_DEV_SERVER_PORT, DEVBOX_INSTALL_TIMEOUT_SECS, DEVBOX_PAGE_ORIGIN,
    DEVBOX_READY_TIMEOUT_SECS,
};
use std::time::Duration;

use crate::env::{parse_env_optional, parse_env_or_default_with_validation};
use crate::manifest::DEFAULT_DEV_SERVER_PORT;

pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewConfig {
    /// Bound on the dependency install's exit
    pub install_timeout: Duration,
    /// Bound on the wait for the server-ready notification
    pub ready_timeout: Duration,
    /// Port written into the manifest's dev script and the dev-server config
    pub dev_server_port: u16,
    /// Origin of the page hosting the preview. `None` trusts the host.
    pub page_origin: Option<String>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            dev_server_port: DEFAULT_DEV_SERVER_PORT,
            page_origin: None,
        }
    }
}

impl PreviewConfig {
    /// Defaults overridden by `DEVBOX_*` environment variables.
    /// Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let install_secs = parse_env_or_default_with_validation(
            DEVBOX_INSTALL_TIMEOUT_SECS,
            defaults.install_timeout.as_secs(),
            |v| v > 0,
        );
        let ready_secs = parse_env_or_default_with_validation(
            DEVBOX_READY_TIMEOUT_SECS,
            defaults.ready_timeout.as_secs(),
            |v| v > 0,
        );
        let dev_server_port = parse_env_or_default_with_validation(
            DEVBOX_DEV_SERVER_PORT,
            defaults.dev_server_port,
            |v| v >= 1024,
        );

        Self {
            install_timeout: Duration::from_secs(install_secs),
            ready_timeout: Duration::from_secs(ready_secs),
            dev_server_port,
            page_origin: parse_env_optional(DEVBOX_PAGE_ORIGIN),
        }
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_page_origin(mut self, origin: impl Into<String>) -> Self {
        self.page_origin = Some(origin.into());
        self
    }
}
