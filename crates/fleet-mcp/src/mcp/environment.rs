//! Startup diagnostics for stdio servers. Informational only.

use std::time::Duration;

use tokio::process::Command;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PATH_PREVIEW_CHARS: usize = 200;

/// Log whether `npx` runs, plus OS, working directory and a PATH preview.
/// Never fails.
pub async fn log_environment_diagnostics() {
    match npx_version().await {
        Some(version) => tracing::info!("npx available: {}", version),
        None => tracing::warn!("npx not available; stdio servers launched through npx will fail"),
    }
    tracing::info!(
        "environment: os={} arch={}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    match std::env::current_dir() {
        Ok(dir) => tracing::info!("working directory: {}", dir.display()),
        Err(e) => tracing::warn!("working directory unavailable: {}", e),
    }
    let path = std::env::var("PATH").unwrap_or_default();
    tracing::debug!("PATH: {}", path_preview(&path));
}

async fn npx_version() -> Option<String> {
    let mut cmd = Command::new("npx");
    cmd.arg("--version").kill_on_drop(true);
    match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(out)) if out.status.success() => {
            Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
        }
        Ok(Ok(out)) => {
            tracing::debug!("npx --version exited with {}", out.status);
            None
        }
        Ok(Err(e)) => {
            tracing::debug!("npx --version could not start: {}", e);
            None
        }
        Err(_) => {
            tracing::debug!("npx --version timed out");
            None
        }
    }
}

fn path_preview(path: &str) -> String {
    if path.chars().count() <= PATH_PREVIEW_CHARS {
        return path.to_string();
    }
    let head: String = path.chars().take(PATH_PREVIEW_CHARS).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_paths_are_truncated() {
        let long = "a".repeat(300);
        let preview = path_preview(&long);
        assert_eq!(preview.len(), PATH_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
        assert_eq!(path_preview("/usr/bin"), "/usr/bin");
    }
}
