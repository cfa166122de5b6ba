// tools.rs - Required external tools
// Purpose: Catalogue of the binaries the launcher and engine depend on,
//          presence probes, install-on-missing, and the --check-tools report

use crate::error::{LaunchError, Result};
use crate::logger::Logger;
use crate::package_manager::Installer;
use crate::system::{CommandSpec, SystemShell};
use colored::*;

/// Browsers able to take headless screenshots, in preference order
pub const BROWSER_CANDIDATES: &[&str] = &["chromium-browser", "chromium", "google-chrome"];

#[derive(Debug, Clone, Copy)]
pub enum Probe {
    /// Any of these commands on PATH
    Command(&'static [&'static str]),
    /// Modules importable by the system interpreter
    PythonModules(&'static [&'static str]),
}

#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub probe: Probe,
    pub package: &'static str,
    /// Package name per manager where it differs from `package`
    pub package_overrides: &'static [(&'static str, &'static str)],
}

impl ToolInfo {
    pub fn package_for(&self, manager: Option<&str>) -> &'static str {
        manager
            .and_then(|m| {
                self.package_overrides
                    .iter()
                    .find(|(name, _)| *name == m)
                    .map(|(_, package)| *package)
            })
            .unwrap_or(self.package)
    }
}

/// Everything the launcher verifies, in check order
pub fn get_tools_list() -> Vec<ToolInfo> {
    vec![
        ToolInfo {
            name: "python3",
            description: "Python interpreter",
            probe: Probe::Command(&["python3"]),
            package: "python3",
            package_overrides: &[("pacman", "python"), ("brew", "python")],
        },
        ToolInfo {
            name: "pip3",
            description: "Python package installer",
            probe: Probe::Command(&["pip3"]),
            package: "python3-pip",
            package_overrides: &[("pacman", "python-pip"), ("apk", "py3-pip"), ("brew", "python")],
        },
        ToolInfo {
            name: "venv",
            description: "Python virtual environment support",
            probe: Probe::PythonModules(&["venv", "ensurepip"]),
            package: "python3-venv",
            package_overrides: &[
                ("dnf", "python3"),
                ("yum", "python3"),
                ("pacman", "python"),
                ("zypper", "python3"),
                ("apk", "python3"),
                ("brew", "python"),
            ],
        },
        ToolInfo {
            name: "nmap",
            description: "Host discovery and port scanner",
            probe: Probe::Command(&["nmap"]),
            package: "nmap",
            package_overrides: &[],
        },
        ToolInfo {
            name: "chromium",
            description: "Headless browser for screenshots",
            probe: Probe::Command(BROWSER_CANDIDATES),
            package: "chromium",
            package_overrides: &[("yum", "chromium-headless")],
        },
    ]
}

/// Where a probe found the tool, None when absent
pub async fn probe_tool<S: SystemShell + ?Sized>(shell: &S, tool: &ToolInfo, python: &str) -> Option<String> {
    match tool.probe {
        Probe::Command(candidates) => {
            for candidate in candidates {
                if shell.command_exists(candidate).await {
                    return Some((*candidate).to_string());
                }
            }
            None
        }
        Probe::PythonModules(modules) => {
            let code = format!("import {}", modules.join(", "));
            let spec = CommandSpec::new(python).arg("-c").arg(code);
            match shell.run(&spec).await {
                Ok(outcome) if outcome.success() => Some(format!("{} -m {}", python, modules[0])),
                _ => None,
            }
        }
    }
}

/// First installed headless-capable browser
pub async fn resolve_browser<S: SystemShell + ?Sized>(shell: &S) -> Option<String> {
    for candidate in BROWSER_CANDIDATES {
        if shell.command_exists(candidate).await {
            return Some((*candidate).to_string());
        }
    }
    None
}

/// Verify every required tool, installing the missing ones.
/// Returns the names of tools that had to be installed.
pub async fn verify_and_install<S: SystemShell + ?Sized>(
    shell: &S,
    logger: &Logger,
    tools: &[ToolInfo],
    python: &str,
) -> Result<Vec<String>> {
    let mut installer = Installer::new(shell, logger);
    let mut installed = Vec::new();

    for tool in tools {
        if let Some(found) = probe_tool(shell, tool, python).await {
            logger.success(format!("{} found ({})", tool.name, found));
            continue;
        }

        logger.warn(format!("{} not found - attempting installation", tool.name));

        let manager = installer.manager().await.map(|m| m.name);
        let package = tool.package_for(manager);
        installer
            .install(package)
            .await
            .map_err(|e| LaunchError::DependencyMissing {
                tool: tool.name.to_string(),
                reason: e.to_string(),
            })?;

        if probe_tool(shell, tool, python).await.is_none() {
            return Err(LaunchError::DependencyMissing {
                tool: tool.name.to_string(),
                reason: format!("still unavailable after installing package '{}'", package),
            });
        }

        logger.success(format!("{} installed", tool.name));
        installed.push(tool.name.to_string());
    }

    Ok(installed)
}

/// Print the state of every tool without installing anything
pub async fn check_tools_status<S: SystemShell + ?Sized>(shell: &S, python: &str) -> usize {
    println!("{}", "── TOOL STATUS ──".cyan().bold());
    let mut missing = 0;

    for tool in get_tools_list() {
        match probe_tool(shell, &tool, python).await {
            Some(found) => println!(
                "    {} {:<10} {:<36} {}",
                "✓".green(),
                tool.name.green(),
                tool.description,
                found.dimmed()
            ),
            None => {
                missing += 1;
                println!(
                    "    {} {:<10} {:<36} {}",
                    "✗".red(),
                    tool.name.red(),
                    tool.description,
                    format!("package: {}", tool.package).dimmed()
                );
            }
        }
    }

    println!();
    if missing == 0 {
        println!("{}", "[+] All required tools are installed.".green().bold());
    } else {
        println!("{}", format!("[!] {} tool(s) missing - run netenum as root to install them.", missing).yellow());
    }
    missing
}
