use std::path::PathBuf;

pub const DEFAULT_LOG_DIRECTIVE: &str = "scoresheetd=info";

/// Startup settings, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// Workspace folder opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_directive: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_directive: DEFAULT_LOG_DIRECTIVE.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            workspace: std::env::var("SCORESHEETD_WORKSPACE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or(default.workspace),
            log_directive: std::env::var("SCORESHEETD_LOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.log_directive),
        }
    }
}
