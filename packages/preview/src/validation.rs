// ABOUTME: Validation utilities for virtual file paths mounted into a sandbox
// ABOUTME: Rejects paths that could escape the sandbox working directory

/// Validates a virtual file path before it is mounted
///
/// Checks that the path:
/// - Is not empty
/// - Is relative (no leading `/` and no drive prefix)
/// - Has no `..` component and no empty component
/// - Uses `/` as the only separator
/// - Contains no NUL byte or other control characters
///
/// # Examples
///
/// ```
/// use devbox_preview::validation::validate_virtual_path;
///
/// assert!(validate_virtual_path("package.json").is_ok());
/// assert!(validate_virtual_path("src/main.jsx").is_ok());
/// assert!(validate_virtual_path("../etc/passwd").is_err());
/// ```
pub fn validate_virtual_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("Path cannot be empty".to_string());
    }

    if path.starts_with('/') || path.contains(':') {
        return Err(format!("Invalid path '{}': must be relative", path));
    }

    if path.contains('\\') {
        return Err(format!(
            "Invalid path '{}': use '/' as the path separator",
            path
        ));
    }

    // Control characters can cause log injection
    if path.chars().any(|c| c.is_control()) {
        return Err(format!(
            "Invalid path '{}': contains control characters",
            path
        ));
    }

    for component in path.split('/') {
        if component.is_empty() {
            return Err(format!("Invalid path '{}': contains an empty component", path));
        }
        if component == ".." {
            return Err(format!(
                "Invalid path '{}': contains path traversal sequence",
                path
            ));
        }
    }

    Ok(())
}
