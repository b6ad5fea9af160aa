// ABOUTME: Dev-server output scanning for the port a server is listening on
// ABOUTME: Recognizes the startup banners of Vite, Next.js, Express and similar servers

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ServerReady;

// Most specific first; the generic localhost patterns are last resort.
static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Local:\s+https?://(?:localhost|127\.0\.0\.1|\[::1\]):(\d+)", // Vite: "Local:   http://localhost:5173/"
        r"Local server:\s+https?://localhost:(\d+)",
        r"Running at https?://localhost:(\d+)",
        r"Server ready at https?://localhost:(\d+)",
        r"server running on port (\d+)",
        r"ready - started server on.*:(\d+)", // Next.js: "ready - started server on 0.0.0.0:3000"
        r"https?://localhost:(\d+)",
        r"localhost:(\d+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

// Terminal colour codes split banners like "Local:  \x1b[36mhttp://..."
static ANSI_ESCAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").ok());

/// Extract the listening port from a single line of server output
pub fn extract_port_from_log(line: &str) -> Option<u16> {
    let cleaned = match ANSI_ESCAPE.as_ref() {
        Some(regex) => regex.replace_all(line, ""),
        None => line.into(),
    };

    PORT_PATTERNS.iter().find_map(|regex| {
        regex
            .captures(&cleaned)
            .and_then(|captures| captures.get(1))
            .and_then(|port| port.as_str().parse::<u16>().ok())
            .filter(|port| *port != 0)
    })
}

/// Ready notification for a line that announces a listening server
pub fn detect_server_ready(line: &str) -> Option<ServerReady> {
    extract_port_from_log(line).map(|port| ServerReady {
        port,
        url: format!("http://localhost:{}", port),
    })
}
