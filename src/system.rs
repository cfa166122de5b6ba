// system.rs - Process seam between the launcher and the host OS
// Purpose: Command-existence probes and subprocess execution behind one trait,
//          so bootstrap steps can be exercised without touching the machine

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// A command line to execute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub env_remove: Vec<String>,
    /// Hand the terminal to the child instead of capturing its output
    pub interactive: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Shell-like rendering for log lines
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// How a finished command ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-empty stderr line, for error messages
    pub fn error_summary(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| match self.code {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            })
    }
}

#[async_trait]
pub trait SystemShell: Send + Sync {
    /// True when `program` resolves to an executable
    async fn command_exists(&self, program: &str) -> bool;

    /// Run to completion; Err only when the process could not be spawned
    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutcome>;
}

/// The real machine
pub struct HostShell;

/// Extra directories searched when `which` comes up empty (sbin is often
/// missing from PATH under sudo)
fn fallback_dirs() -> Vec<PathBuf> {
    ["/usr/local/sbin", "/usr/local/bin", "/usr/sbin", "/usr/bin", "/sbin", "/bin", "/snap/bin"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

#[async_trait]
impl SystemShell for HostShell {
    async fn command_exists(&self, program: &str) -> bool {
        if program.contains('/') {
            return is_executable(std::path::Path::new(program));
        }

        let found = Command::new("which")
            .arg(program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);

        found || fallback_dirs().iter().any(|dir| is_executable(&dir.join(program)))
    }

    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutcome> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).kill_on_drop(true);
        for key in &spec.env_remove {
            command.env_remove(key);
        }
        for (key, value) in &spec.envs {
            command.env(key, value);
        }

        if spec.interactive {
            let status = command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await?;
            return Ok(CommandOutcome {
                code: status.code(),
                ..CommandOutcome::default()
            });
        }

        let output = command.stdin(Stdio::null()).output().await?;
        Ok(CommandOutcome {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Scripted shell: a fixed set of installed programs and per-program results.
    /// Successful package-manager installs make the package's command appear.
    #[derive(Default)]
    pub struct FakeShell {
        pub installed: Mutex<HashSet<String>>,
        pub failing: Mutex<HashSet<String>>,
        pub outcomes: Mutex<HashMap<String, CommandOutcome>>,
        pub responses: Mutex<Vec<(String, CommandOutcome)>>,
        pub calls: Mutex<Vec<CommandSpec>>,
        /// package name -> command it provides
        pub provides: Mutex<HashMap<String, String>>,
    }

    impl FakeShell {
        pub fn with_commands(commands: &[&str]) -> Self {
            let shell = Self::default();
            shell
                .installed
                .lock()
                .unwrap()
                .extend(commands.iter().map(|c| c.to_string()));
            shell
        }

        /// Any command line containing `needle` fails
        pub fn fail_on(&self, needle: &str) {
            self.failing.lock().unwrap().insert(needle.to_string());
        }

        pub fn set_outcome(&self, program: &str, outcome: CommandOutcome) {
            self.outcomes.lock().unwrap().insert(program.to_string(), outcome);
        }

        /// Command lines containing `needle` succeed with `stdout`; checked
        /// before per-program outcomes
        pub fn respond(&self, needle: &str, stdout: &str) {
            self.responses.lock().unwrap().push((
                needle.to_string(),
                CommandOutcome {
                    code: Some(0),
                    stdout: stdout.to_string(),
                    ..CommandOutcome::default()
                },
            ));
        }

        pub fn provide(&self, package: &str, command: &str) {
            self.provides
                .lock()
                .unwrap()
                .insert(package.to_string(), command.to_string());
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_matching(&self, needle: &str) -> usize {
            self.calls()
                .iter()
                .filter(|spec| spec.display().contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl SystemShell for FakeShell {
        async fn command_exists(&self, program: &str) -> bool {
            self.installed.lock().unwrap().contains(program)
        }

        async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutcome> {
            self.calls.lock().unwrap().push(spec.clone());
            let line = spec.display();

            if self.failing.lock().unwrap().iter().any(|needle| line.contains(needle.as_str())) {
                return Ok(CommandOutcome {
                    code: Some(1),
                    stderr: format!("{} failed", spec.program),
                    ..CommandOutcome::default()
                });
            }

            let provides = self.provides.lock().unwrap().clone();
            for arg in &spec.args {
                if let Some(command) = provides.get(arg) {
                    self.installed.lock().unwrap().insert(command.clone());
                }
            }

            if let Some((_, outcome)) = self
                .responses
                .lock()
                .unwrap()
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
            {
                return Ok(outcome.clone());
            }

            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .get(&spec.program)
                .cloned()
                .unwrap_or(CommandOutcome {
                    code: Some(0),
                    ..CommandOutcome::default()
                }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("pip").args(["install", "-r", "requirements.txt"]);
        assert_eq!(spec.display(), "pip install -r requirements.txt");
    }

    #[test]
    fn test_error_summary_prefers_stderr() {
        let outcome = CommandOutcome {
            code: Some(100),
            stdout: String::new(),
            stderr: "Reading package lists...\nE: Unable to locate package foo\n\n".to_string(),
        };
        assert_eq!(outcome.error_summary(), "E: Unable to locate package foo");

        let silent = CommandOutcome { code: Some(2), ..CommandOutcome::default() };
        assert_eq!(silent.error_summary(), "exit status 2");
    }

    #[tokio::test]
    async fn test_host_shell_runs_commands() {
        let outcome = HostShell
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; exit 3"]))
            .await
            .unwrap();
        assert_eq!(outcome.code, Some(3));
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(HostShell.command_exists("sh").await);
        assert!(!HostShell.command_exists("definitely-not-a-real-binary-xyz").await);
    }
}
