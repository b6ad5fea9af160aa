// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Devbox

// Provisioning Timeouts
pub const DEVBOX_INSTALL_TIMEOUT_SECS: &str = "DEVBOX_INSTALL_TIMEOUT_SECS";
pub const DEVBOX_READY_TIMEOUT_SECS: &str = "DEVBOX_READY_TIMEOUT_SECS";

// Dev Server Configuration
pub const DEVBOX_DEV_SERVER_PORT: &str = "DEVBOX_DEV_SERVER_PORT";

// Secure Context Check
pub const DEVBOX_PAGE_ORIGIN: &str = "DEVBOX_PAGE_ORIGIN";
