// package_manager.rs - System package manager detection and installs
// Purpose: Probe the known package managers in a fixed preference order,
//          keep the first one present, and install packages through it

use crate::logger::Logger;
use crate::system::{CommandSpec, SystemShell};
use anyhow::{Result, bail};

#[derive(Debug, PartialEq, Eq)]
pub struct PackageManager {
    pub name: &'static str,
    pub binary: &'static str,
    pub install_args: &'static [&'static str],
    /// Run once before the first install (index refresh)
    pub refresh_args: Option<&'static [&'static str]>,
}

/// Preference order: first match wins
pub const PACKAGE_MANAGERS: &[PackageManager] = &[
    PackageManager {
        name: "apt",
        binary: "apt-get",
        install_args: &["install", "-y"],
        refresh_args: Some(&["update"]),
    },
    PackageManager {
        name: "dnf",
        binary: "dnf",
        install_args: &["install", "-y"],
        refresh_args: None,
    },
    PackageManager {
        name: "yum",
        binary: "yum",
        install_args: &["install", "-y"],
        refresh_args: None,
    },
    PackageManager {
        name: "pacman",
        binary: "pacman",
        install_args: &["-S", "--noconfirm", "--needed"],
        refresh_args: Some(&["-Sy"]),
    },
    PackageManager {
        name: "zypper",
        binary: "zypper",
        install_args: &["--non-interactive", "install"],
        refresh_args: None,
    },
    PackageManager {
        name: "apk",
        binary: "apk",
        install_args: &["add"],
        refresh_args: Some(&["update"]),
    },
    PackageManager {
        name: "brew",
        binary: "brew",
        install_args: &["install"],
        refresh_args: None,
    },
];

/// First available manager in preference order
pub async fn detect<S: SystemShell + ?Sized>(shell: &S) -> Option<&'static PackageManager> {
    for manager in PACKAGE_MANAGERS {
        if shell.command_exists(manager.binary).await {
            return Some(manager);
        }
    }
    None
}

/// Lazily detects a manager on first use and refreshes its index once
pub struct Installer<'a, S: SystemShell + ?Sized> {
    shell: &'a S,
    logger: &'a Logger,
    manager: Option<Option<&'static PackageManager>>,
    refreshed: bool,
}

impl<'a, S: SystemShell + ?Sized> Installer<'a, S> {
    pub fn new(shell: &'a S, logger: &'a Logger) -> Self {
        Self {
            shell,
            logger,
            manager: None,
            refreshed: false,
        }
    }

    pub async fn manager(&mut self) -> Option<&'static PackageManager> {
        if let Some(detected) = self.manager {
            return detected;
        }
        let detected = detect(self.shell).await;
        match detected {
            Some(manager) => self.logger.info(format!("Using package manager: {}", manager.name)),
            None => self.logger.warn("No supported package manager found"),
        }
        self.manager = Some(detected);
        detected
    }

    /// Install `package`; errors carry the manager's own complaint
    pub async fn install(&mut self, package: &str) -> Result<&'static PackageManager> {
        let Some(manager) = self.manager().await else {
            bail!(
                "no supported package manager found (tried {})",
                PACKAGE_MANAGERS.iter().map(|m| m.binary).collect::<Vec<_>>().join(", ")
            );
        };

        if !self.refreshed {
            self.refreshed = true;
            if let Some(refresh_args) = manager.refresh_args {
                let spec = CommandSpec::new(manager.binary).args(refresh_args.iter().copied());
                self.logger.debug(format!("Running: {}", spec.display()));
                match self.shell.run(&spec).await {
                    Ok(outcome) if outcome.success() => {}
                    Ok(outcome) => self.logger.warn(format!(
                        "{} index refresh failed: {}",
                        manager.name,
                        outcome.error_summary()
                    )),
                    Err(e) => self.logger.warn(format!("{} index refresh failed: {}", manager.name, e)),
                }
            }
        }

        let spec = CommandSpec::new(manager.binary)
            .args(manager.install_args.iter().copied())
            .arg(package);
        self.logger.info(format!("Installing {} via {}...", package, manager.name));
        self.logger.debug(format!("Running: {}", spec.display()));

        let outcome = self.shell.run(&spec).await?;
        if !outcome.success() {
            bail!("{} install {} failed: {}", manager.name, package, outcome.error_summary());
        }
        Ok(manager)
    }
}
