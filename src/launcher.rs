// launcher.rs - Bootstrap launcher
// Purpose: Privilege check, logging, dependency verification, isolated
//          environment setup, then hand-off to the entry point. Signals abort
//          the in-flight step; cleanup runs exactly once on every exit path.

use crate::config::LauncherConfig;
use crate::error::{LaunchError, Result};
use crate::logger::{Logger, is_log_file_for};
use crate::privilege;
use crate::system::SystemShell;
use crate::tools::{self, ToolInfo};
use crate::venv::{self, ActivatedEnv};
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Hangup,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
        }
    }

    fn into_error(self) -> LaunchError {
        match self {
            Signal::Interrupt => LaunchError::Interrupted,
            other => LaunchError::Terminated(other.name().to_string()),
        }
    }
}

/// Resolves with the first of SIGINT, SIGTERM or SIGHUP
#[cfg(unix)]
pub async fn wait_for_signal() -> Signal {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut interrupt), Ok(mut terminate), Ok(mut hangup)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) else {
        // Without handlers the default disposition applies; never resolve
        return std::future::pending().await;
    };

    tokio::select! {
        _ = interrupt.recv() => Signal::Interrupt,
        _ = terminate.recv() => Signal::Terminate,
        _ = hangup.recv() => Signal::Hangup,
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> Signal {
    if tokio::signal::ctrl_c().await.is_err() {
        return std::future::pending().await;
    }
    Signal::Interrupt
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Exiting,
}

/// What one cleanup pass removed
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub log_files_removed: usize,
    pub runtime_dir_removed: bool,
}

/// Deletes this tool's log files and the runtime directory. Runs at most once,
/// whether called explicitly or on drop.
pub struct CleanupGuard {
    logger: Logger,
    log_dir: PathBuf,
    log_prefix: String,
    runtime_dir: PathBuf,
    done: AtomicBool,
}

impl CleanupGuard {
    pub fn new(logger: Logger, config: &LauncherConfig) -> Self {
        Self {
            logger,
            log_dir: config.log_dir.clone(),
            log_prefix: config.log_prefix.clone(),
            runtime_dir: config.runtime_dir.clone(),
            done: AtomicBool::new(false),
        }
    }

    /// Returns None when cleanup already happened
    pub fn run(&self) -> Option<CleanupReport> {
        if self.done.swap(true, Ordering::SeqCst) {
            return None;
        }

        self.logger.debug("Cleaning up...");
        self.logger.close();

        let mut report = CleanupReport::default();
        if let Ok(entries) = fs::read_dir(&self.log_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if is_log_file_for(&self.log_prefix, name) && fs::remove_file(entry.path()).is_ok() {
                    report.log_files_removed += 1;
                }
            }
        }

        if self.runtime_dir.exists() {
            report.runtime_dir_removed = fs::remove_dir_all(&self.runtime_dir).is_ok();
        }

        Some(report)
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.run();
    }
}

pub struct Launcher<'a, S: SystemShell + ?Sized> {
    shell: &'a S,
    logger: &'a Logger,
    config: &'a LauncherConfig,
    tools: Vec<ToolInfo>,
    state: Mutex<RunState>,
}

impl<'a, S: SystemShell + ?Sized> Launcher<'a, S> {
    pub fn new(shell: &'a S, logger: &'a Logger, config: &'a LauncherConfig) -> Self {
        Self {
            shell,
            logger,
            config,
            tools: tools::get_tools_list(),
            state: Mutex::new(RunState::Running),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.lock().map(|s| *s).unwrap_or(RunState::Exiting)
    }

    fn set_state(&self, next: RunState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Steps 3-6: dependencies, environment, manifest, delegation
    pub async fn bootstrap(&self) -> Result<()> {
        self.logger.info("── DEPENDENCY CHECK ──");
        tools::verify_and_install(self.shell, self.logger, &self.tools, &self.config.python).await?;

        self.logger.info("── ENVIRONMENT SETUP ──");
        venv::ensure_env(self.shell, self.logger, &self.config.python, &self.config.env_dir).await?;
        let env = ActivatedEnv::activate(self.shell, &self.config.env_dir).await?;
        self.logger.success(format!("Environment activated ({})", env.python.display()));
        venv::install_manifest(self.shell, self.logger, &env, &self.config.manifest).await?;

        self.logger.info("── LAUNCH ──");
        self.delegate(&env).await?;

        self.logger.success("NetEnum finished successfully");
        Ok(())
    }

    async fn delegate(&self, env: &ActivatedEnv) -> Result<()> {
        let entry_point = &self.config.entry_point;
        if !entry_point.exists() {
            return Err(LaunchError::EntryPointMissing(entry_point.clone()));
        }

        let spec = env
            .command(&env.python)
            .arg(entry_point.to_string_lossy())
            .interactive();
        self.logger.info(format!("Starting {}...", entry_point.display()));
        self.logger.debug(format!("Running: {}", spec.display()));

        let outcome = self.shell.run(&spec).await?;
        match outcome.code {
            Some(0) => Ok(()),
            Some(code) => Err(LaunchError::DelegateFailed(code)),
            None => Err(LaunchError::DelegateFailed(-1)),
        }
    }

    /// Race the bootstrap against `shutdown`; a signal wins by dropping the
    /// bootstrap future, which kills any child it spawned
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Signal>,
    {
        tokio::select! {
            result = self.bootstrap() => result,
            signal = shutdown => {
                if self.state() == RunState::Running {
                    self.set_state(RunState::Exiting);
                    self.logger.warn(format!("Received {} - shutting down", signal.name()));
                }
                Err(signal.into_error())
            }
        }
    }
}

/// Whole launcher lifecycle. `uid` is the effective user id.
pub async fn run<S, F>(
    shell: &S,
    config: &LauncherConfig,
    uid: u32,
    verbose: bool,
    shutdown: F,
) -> Result<()>
where
    S: SystemShell + ?Sized,
    F: Future<Output = Signal>,
{
    // Nothing is created before this check
    privilege::require_root(uid)?;

    let logger = Logger::with_file(&config.log_dir, &config.log_prefix, verbose)?;
    let guard = CleanupGuard::new(logger.clone(), config);

    if let Some(path) = logger.log_file() {
        logger.info(format!("Logging to {}", path.display()));
    }

    let launcher = Launcher::new(shell, &logger, config);
    let result = launcher.run_until(shutdown).await;

    if let Err(e) = &result {
        logger.error(e.to_string());
    }

    guard.run();
    result
}
