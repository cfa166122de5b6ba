// error.rs - Launcher error taxonomy
// Every fatal launcher condition maps to one variant; all of them exit with status 1.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("This tool must be run as root. Re-run it with elevated privileges: sudo netenum")]
    Privilege,

    #[error("Missing dependency '{tool}': {reason}")]
    DependencyMissing { tool: String, reason: String },

    #[error("Environment setup failed: {0}")]
    EnvironmentSetup(String),

    #[error("Dependency installation failed: {0}")]
    Installation(String),

    #[error("Entry point not found: {}", .0.display())]
    EntryPointMissing(PathBuf),

    #[error("Execution interrupted by user")]
    Interrupted,

    #[error("Terminated by {0}")]
    Terminated(String),

    #[error("Delegated program exited with status {0}")]
    DelegateFailed(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type Result<T> = std::result::Result<T, LaunchError>;
