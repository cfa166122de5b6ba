// venv.rs - Isolated Python environment
// Purpose: Create the environment once, resolve its interpreter and installer
//          ("activation" without touching this process's environment), and
//          install the dependency manifest into it

use crate::error::{LaunchError, Result};
use crate::logger::Logger;
use crate::system::{CommandSpec, SystemShell};
use std::path::{Path, PathBuf};

#[cfg(windows)]
const BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
const BIN_DIR: &str = "bin";

/// Interpreter and installer of an environment, plus the variables a child
/// needs to run inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedEnv {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub python: PathBuf,
    pub pip: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestStatus {
    Installed,
    Missing,
}

impl ActivatedEnv {
    pub fn paths(root: &Path) -> Self {
        let bin_dir = root.join(BIN_DIR);
        Self {
            root: root.to_path_buf(),
            python: bin_dir.join("python"),
            pip: bin_dir.join("pip"),
            bin_dir,
        }
    }

    /// Resolve the environment at `root`; its interpreter must be runnable
    pub async fn activate<S: SystemShell + ?Sized>(shell: &S, root: &Path) -> Result<Self> {
        let env = Self::paths(root);
        if !shell.command_exists(&env.python.to_string_lossy()).await {
            return Err(LaunchError::EnvironmentSetup(format!(
                "no interpreter at {}",
                env.python.display()
            )));
        }
        Ok(env)
    }

    /// A command running `program` inside this environment
    pub fn command(&self, program: &Path) -> CommandSpec {
        let path = match std::env::var_os("PATH") {
            Some(current) => {
                let mut dirs = vec![self.bin_dir.clone()];
                dirs.extend(std::env::split_paths(&current));
                std::env::join_paths(dirs)
                    .map(|joined| joined.to_string_lossy().to_string())
                    .unwrap_or_else(|_| self.bin_dir.to_string_lossy().to_string())
            }
            None => self.bin_dir.to_string_lossy().to_string(),
        };

        CommandSpec::new(program.to_string_lossy())
            .env("VIRTUAL_ENV", self.root.to_string_lossy())
            .env("PATH", path)
            .env_remove("PYTHONHOME")
    }
}

/// Create the environment if its directory is absent.
/// Returns true when a creation happened.
pub async fn ensure_env<S: SystemShell + ?Sized>(
    shell: &S,
    logger: &Logger,
    python: &str,
    dir: &Path,
) -> Result<bool> {
    if dir.exists() {
        logger.info(format!("Using existing environment at {}", dir.display()));
        return Ok(false);
    }

    logger.info(format!("Creating environment at {}...", dir.display()));
    let spec = CommandSpec::new(python)
        .args(["-m", "venv"])
        .arg(dir.to_string_lossy());
    logger.debug(format!("Running: {}", spec.display()));

    let outcome = shell
        .run(&spec)
        .await
        .map_err(|e| LaunchError::EnvironmentSetup(format!("{}: {}", spec.display(), e)))?;
    if !outcome.success() {
        return Err(LaunchError::EnvironmentSetup(format!(
            "{} failed: {}",
            spec.display(),
            outcome.error_summary()
        )));
    }

    logger.success(format!("Environment created at {}", dir.display()));
    Ok(true)
}

/// Upgrade pip and install the manifest when it exists; a missing manifest is
/// only a warning
pub async fn install_manifest<S: SystemShell + ?Sized>(
    shell: &S,
    logger: &Logger,
    env: &ActivatedEnv,
    manifest: &Path,
) -> Result<ManifestStatus> {
    if !manifest.exists() {
        logger.warn(format!(
            "{} not found - skipping dependency installation",
            manifest.display()
        ));
        return Ok(ManifestStatus::Missing);
    }

    let python = env.python.clone();
    let steps = [
        (
            "Upgrading pip",
            env.command(&python).args(["-m", "pip", "install", "--upgrade", "pip"]),
        ),
        (
            "Installing dependencies",
            env.command(&env.pip)
                .args(["install", "-r"])
                .arg(manifest.to_string_lossy()),
        ),
    ];

    for (label, spec) in steps {
        logger.info(format!("{}...", label));
        logger.debug(format!("Running: {}", spec.display()));
        let outcome = shell
            .run(&spec)
            .await
            .map_err(|e| LaunchError::Installation(format!("{}: {}", spec.display(), e)))?;
        if !outcome.success() {
            return Err(LaunchError::Installation(format!(
                "{} failed: {}",
                spec.display(),
                outcome.error_summary()
            )));
        }
    }

    logger.success(format!("Dependencies from {} installed", manifest.display()));
    Ok(ManifestStatus::Installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::FakeShell;

    #[tokio::test]
    async fn test_existing_env_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell::with_commands(&[]);
        let logger = Logger::new(false);

        let created = ensure_env(&shell, &logger, "python3", dir.path()).await.unwrap();
        assert!(!created);
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_absent_env_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let env_dir = dir.path().join("venv");
        let shell = FakeShell::with_commands(&[]);
        let logger = Logger::new(false);

        let created = ensure_env(&shell, &logger, "python3", &env_dir).await.unwrap();
        assert!(created);
        assert_eq!(shell.calls_matching("-m venv"), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_is_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell::with_commands(&[]);
        shell.fail_on("-m venv");
        let logger = Logger::new(false);

        let err = ensure_env(&shell, &logger, "python3", &dir.path().join("venv"))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::EnvironmentSetup(_)));
    }

    #[tokio::test]
    async fn test_activation_requires_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell::with_commands(&[]);
        assert!(ActivatedEnv::activate(&shell, dir.path()).await.is_err());

        let env = ActivatedEnv::paths(dir.path());
        shell.installed.lock().unwrap().insert(env.python.to_string_lossy().to_string());
        let activated = ActivatedEnv::activate(&shell, dir.path()).await.unwrap();
        assert_eq!(activated, env);
    }

    #[test]
    fn test_command_runs_inside_env() {
        let env = ActivatedEnv::paths(Path::new("/opt/netenum/venv"));
        let spec = env.command(&env.python);

        assert!(spec.program.ends_with("python"));
        assert!(spec.envs.contains(&("VIRTUAL_ENV".to_string(), "/opt/netenum/venv".to_string())));
        let path = spec.envs.iter().find(|(k, _)| k == "PATH").map(|(_, v)| v.clone()).unwrap();
        assert!(path.starts_with(&env.bin_dir.to_string_lossy().to_string()));
        assert_eq!(spec.env_remove, vec!["PYTHONHOME".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell::with_commands(&[]);
        let logger = Logger::new(false);
        let env = ActivatedEnv::paths(&dir.path().join("venv"));

        let status = install_manifest(&shell, &logger, &env, &dir.path().join("requirements.txt"))
            .await
            .unwrap();
        assert_eq!(status, ManifestStatus::Missing);
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_manifest_upgrades_pip_then_installs() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, "requests\n").unwrap();
        let shell = FakeShell::with_commands(&[]);
        let logger = Logger::new(false);
        let env = ActivatedEnv::paths(&dir.path().join("venv"));

        let status = install_manifest(&shell, &logger, &env, &manifest).await.unwrap();
        assert_eq!(status, ManifestStatus::Installed);

        let calls = shell.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].display().ends_with("-m pip install --upgrade pip"));
        assert!(calls[1].display().contains("install -r"));
    }

    #[tokio::test]
    async fn test_manifest_failure_is_installation_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("requirements.txt");
        std::fs::write(&manifest, "not-a-package==0\n").unwrap();
        let shell = FakeShell::with_commands(&[]);
        shell.fail_on("install -r");
        let logger = Logger::new(false);
        let env = ActivatedEnv::paths(&dir.path().join("venv"));

        let err = install_manifest(&shell, &logger, &env, &manifest).await.unwrap_err();
        assert!(matches!(err, LaunchError::Installation(_)));
    }
}
