// engine.rs - Scan orchestration
// Purpose: Host discovery -> bounded parallel port scans -> HTTP capture,
//          persisting results after every step and keeping a per-scan log

use crate::config::EngineConfig;
use crate::logger::Logger;
use crate::model::{Host, Port, Scan, ScanState, unix_now};
use crate::nmap::{self, parse_ping_sweep, parse_port_scan, ping_sweep_args, port_scan_args};
use crate::store::save_scan;
use crate::system::SystemShell;
use crate::tools::resolve_browser;
use crate::web_capture::{build_client, capture_screenshot, fetch, target_url};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};

pub struct Engine {
    shell: Arc<dyn SystemShell>,
    logger: Logger,
    config: EngineConfig,
    state: Arc<Mutex<ScanState>>,
}

/// Held for the duration of a scan; dropping it marks the engine idle
pub struct ScanGuard {
    state: Arc<Mutex<ScanState>>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            *state = ScanState::default();
        }
    }
}

impl Engine {
    pub fn new(shell: Arc<dyn SystemShell>, logger: Logger, config: EngineConfig) -> Self {
        Self {
            shell,
            logger,
            config,
            state: Arc::new(Mutex::new(ScanState::default())),
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shell(&self) -> &dyn SystemShell {
        self.shell.as_ref()
    }

    pub fn state(&self) -> ScanState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Claim the engine; `None` when a scan is already running
    pub fn try_begin(&self) -> Option<ScanGuard> {
        let mut state = self.state.lock().ok()?;
        if state.scanning {
            return None;
        }
        state.scanning = true;
        state.current_host = None;
        Some(ScanGuard {
            state: Arc::clone(&self.state),
        })
    }

    fn set_current_host(&self, ip: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.current_host = Some(ip.to_string());
        }
    }

    fn persist(&self, scan: &Mutex<Scan>) -> Result<()> {
        let snapshot = scan
            .lock()
            .map_err(|_| anyhow::anyhow!("scan state poisoned"))?
            .clone();
        save_scan(&snapshot, &self.config.results_file)
    }

    /// Full pipeline over `network`; the guard is released when the scan ends
    pub async fn run_scan(&self, guard: ScanGuard, network: &str) -> Result<Scan> {
        let _guard = guard;
        let scan = Mutex::new(Scan::new(network));
        let mut scan_log: Vec<String> = Vec::new();
        self.logger.info(format!("Scan started for network: {}", network));

        std::fs::create_dir_all(&self.config.scans_dir)
            .with_context(|| format!("Failed to create {}", self.config.scans_dir.display()))?;

        let alive = self.ping_sweep(network, &scan).await?;

        let mut port_scans = stream::iter(alive.iter().cloned())
            .map(|host| {
                let scan = &scan;
                async move {
                    let result = self.port_scan(&host.ip, scan).await;
                    (host.ip, result)
                }
            })
            .buffer_unordered(self.config.port_scan_workers.max(1));

        while let Some((ip, result)) = port_scans.next().await {
            match result {
                Ok(ports) => {
                    let numbers: Vec<u16> = ports.iter().map(|p| p.port).collect();
                    scan_log.push(format!("Open ports on {}: {:?}", ip, numbers));
                    self.logger.info(format!("Completed port scan on {}", ip));
                }
                Err(e) => {
                    scan_log.push(format!("Error processing {}: {}", ip, e));
                    self.logger.error(format!("Error processing {}: {}", ip, e));
                }
            }
        }
        drop(port_scans);

        let snapshot = {
            let mut scan = lock(&scan)?;
            scan.end = Some(unix_now());
            scan.clone()
        };
        for host in &snapshot.hosts {
            let line = format!("Host: {} ({})", host.ip, host.hostname.as_deref().unwrap_or("None"));
            self.logger.info(&line);
            scan_log.push(line);
            for port in &host.open_ports {
                let line = format!(
                    "  Port: {}, Service: {}, Version: {}",
                    port.port,
                    port.service,
                    port.version.as_deref().unwrap_or("None")
                );
                self.logger.info(&line);
                scan_log.push(line);
            }
        }

        self.http_scan(&scan).await?;

        let finished = lock(&scan)?.clone();
        let line = format!("Scan completed in {:.2} seconds.", finished.duration().unwrap_or_default());
        self.logger.success(&line);
        scan_log.push(line);
        save_scan(&finished, &self.config.results_file)?;

        std::fs::write(&self.config.scan_log_file, scan_log.join("\n"))
            .with_context(|| format!("Failed to write {}", self.config.scan_log_file.display()))?;

        Ok(finished)
    }

    /// Live hosts sorted by address; a failed sweep yields none
    async fn ping_sweep(&self, network: &str, scan: &Mutex<Scan>) -> Result<Vec<Host>> {
        self.logger.info(format!("Starting ping sweep on network: {}", network));
        let args = ping_sweep_args(network, &self.config.scans_dir);

        let stdout = match nmap::run_nmap(self.shell(), &self.logger, &args).await {
            Ok(stdout) => stdout,
            Err(e) => {
                self.logger.error(format!("Ping sweep failed: {}", e));
                return Ok(Vec::new());
            }
        };

        let mut hosts = parse_ping_sweep(&stdout);
        for host in &hosts {
            self.logger.success(format!(
                "Host alive: {} ({}) {}",
                host.ip,
                host.hostname.as_deref().unwrap_or("No hostname"),
                host.mac.as_deref().unwrap_or_default()
            ));
            lock(scan)?.hosts.push(host.clone());
            self.persist(scan)?;
        }

        hosts.sort_by_key(Host::sort_key);
        lock(scan)?.hosts.sort_by_key(Host::sort_key);
        self.logger.info(format!("Ping sweep complete: {} live hosts", hosts.len()));
        Ok(hosts)
    }

    async fn port_scan(&self, ip: &str, scan: &Mutex<Scan>) -> Result<Vec<Port>> {
        self.set_current_host(ip);
        self.logger.info(format!("Starting port scan on {}", ip));

        let args = port_scan_args(ip, &self.config.port_range, &self.config.scans_dir);
        let stdout = match nmap::run_nmap(self.shell(), &self.logger, &args).await {
            Ok(stdout) => stdout,
            Err(e) => {
                // The host stays in the results with no open ports
                self.logger.error(format!("Port scan failed for {}: {}", ip, e));
                if let Some(host) = lock(scan)?.host_mut(ip) {
                    host.open_ports.clear();
                }
                self.persist(scan)?;
                return Ok(Vec::new());
            }
        };
        let report = parse_port_scan(&stdout);
        for port in &report.ports {
            self.logger.info(format!("Open port on {}: {}/{} {}", ip, port.port, port.state, port.service));
        }

        let ports = {
            let mut scan = lock(scan)?;
            let host = scan
                .host_mut(ip)
                .with_context(|| format!("{} is not part of this scan", ip))?;
            report.apply_to(host);
            host.open_ports.clone()
        };
        self.persist(scan)?;
        Ok(ports)
    }

    async fn http_scan(&self, scan: &Mutex<Scan>) -> Result<()> {
        self.logger.info("Starting HTTP scan on open ports");
        let client = build_client(self.config.http_timeout_secs)?;
        let browser = resolve_browser(self.shell()).await;
        if browser.is_none() {
            self.logger.warn("No headless browser found, screenshots disabled");
        }

        let targets: Vec<(String, u16, String)> = lock(scan)?
            .hosts
            .iter()
            .flat_map(|h| h.open_ports.iter().map(|p| (h.ip.clone(), p.port, p.service.clone())))
            .collect();

        for (ip, port, service) in targets {
            let url = target_url(&ip, port, &service);
            let raw = match fetch(&client, &url).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    self.logger.warn(format!("Failed HTTP request to {}:{} ({})", ip, port, e));
                    continue;
                }
            };
            self.logger.debug(format!("HTTP response from {}:{}", ip, port));

            let screenshot = match &browser {
                Some(browser) => {
                    self.logger.info(format!("Capturing screenshot of {}:{}", ip, port));
                    capture_screenshot(self.shell(), browser, &self.config.runtime_dir, &ip, port, &url)
                        .await
                        .unwrap_or_else(|e| {
                            self.logger.warn(format!("Screenshot of {}:{} failed: {}", ip, port, e));
                            None
                        })
                }
                None => None,
            };

            {
                let mut scan = lock(scan)?;
                if let Some(entry) = scan
                    .host_mut(&ip)
                    .and_then(|h| h.open_ports.iter_mut().find(|p| p.port == port))
                {
                    entry.http_response = Some(raw);
                    entry.screenshot = screenshot;
                }
            }
            self.persist(scan)?;
        }
        Ok(())
    }
}

fn lock(scan: &Mutex<Scan>) -> Result<std::sync::MutexGuard<'_, Scan>> {
    scan.lock().map_err(|_| anyhow::anyhow!("scan state poisoned"))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::store::load_scan;
    use crate::system::fake::FakeShell;
    use axum::Router;
    use axum::routing::get;
    use std::path::Path;

    pub fn test_config(dir: &Path) -> EngineConfig {
        EngineConfig {
            results_file: dir.join("scan_results.json"),
            scans_dir: dir.join("scans"),
            scan_log_file: dir.join("scan_log.txt"),
            token_file: dir.join("api_token.txt"),
            runtime_dir: dir.join("runtime"),
            http_timeout_secs: 2,
            ..EngineConfig::default()
        }
    }

    const SWEEP: &str = "\
Nmap scan report for 127.0.0.9 [host down, received no-response]
Nmap scan report for localhost (127.0.0.1)
Host is up, received localhost-response (0.000010s latency).
Nmap done: 2 IP addresses (1 host up) scanned in 0.10 seconds
";

    async fn serve_page() -> u16 {
        let app = Router::new().route("/", get(|| async { "<title>router</title>" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.ok() });
        port
    }

    #[tokio::test]
    async fn test_full_scan_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let web_port = serve_page().await;

        let shell = Arc::new(FakeShell::with_commands(&["nmap"]));
        shell.respond("-sn", SWEEP);
        shell.respond(
            "port_scan_127-0-0-1",
            &format!("{}/tcp open  http  Axum test server\nRunning: Linux 5.X\n", web_port),
        );

        let engine = Engine::new(shell.clone(), Logger::new(false), test_config(dir.path()));
        let guard = engine.try_begin().unwrap();
        assert!(engine.state().scanning);

        let scan = engine.run_scan(guard, "127.0.0.0/30").await.unwrap();

        assert_eq!(scan.hosts.len(), 1);
        let host = &scan.hosts[0];
        assert_eq!(host.ip, "127.0.0.1");
        assert_eq!(host.hostname.as_deref(), Some("localhost"));
        assert_eq!(host.os.as_deref(), Some("Linux 5.X"));
        assert_eq!(host.open_ports[0].port, web_port);
        let raw = host.open_ports[0].http_response.as_deref().unwrap();
        assert!(raw.contains("<title>router</title>"));
        // no browser installed
        assert!(host.open_ports[0].screenshot.is_none());
        assert!(scan.end.is_some());

        let saved = load_scan(&dir.path().join("scan_results.json")).unwrap();
        assert_eq!(saved.hosts, scan.hosts);
        let log = std::fs::read_to_string(dir.path().join("scan_log.txt")).unwrap();
        assert!(log.contains(&format!("Open ports on 127.0.0.1: [{}]", web_port)));
        assert!(log.contains("Host: 127.0.0.1 (localhost)"));
        assert!(log.lines().last().unwrap().starts_with("Scan completed in "));

        assert_eq!(engine.state(), ScanState::default());
        assert_eq!(shell.calls_matching("nmap -sn"), 1);
    }

    #[tokio::test]
    async fn test_failed_sweep_finishes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let shell = Arc::new(FakeShell::with_commands(&["nmap"]));
        shell.fail_on("-sn");

        let engine = Engine::new(shell.clone(), Logger::new(false), test_config(dir.path()));
        let guard = engine.try_begin().unwrap();
        let scan = engine.run_scan(guard, "10.0.0.0/24").await.unwrap();

        assert!(scan.hosts.is_empty());
        assert_eq!(shell.calls_matching("port_scan_"), 0);
        assert!(dir.path().join("scan_log.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_port_scan_leaves_host_without_ports() {
        let dir = tempfile::tempdir().unwrap();
        let shell = Arc::new(FakeShell::with_commands(&["nmap"]));
        shell.respond("-sn", SWEEP);
        shell.fail_on("port_scan_127-0-0-1");

        let engine = Engine::new(shell, Logger::new(false), test_config(dir.path()));
        let guard = engine.try_begin().unwrap();
        let scan = engine.run_scan(guard, "127.0.0.0/30").await.unwrap();

        assert_eq!(scan.hosts.len(), 1);
        assert!(scan.hosts[0].open_ports.is_empty());
        let saved = load_scan(&dir.path().join("scan_results.json")).unwrap();
        assert_eq!(saved.hosts[0].ip, "127.0.0.1");
        let log = std::fs::read_to_string(dir.path().join("scan_log.txt")).unwrap();
        assert!(log.contains("Open ports on 127.0.0.1: []"));
        assert!(!log.contains("Error processing"));
    }

    #[test]
    fn test_only_one_scan_at_a_time() {
        let engine = Engine::new(Arc::new(FakeShell::default()), Logger::new(false), EngineConfig::default());
        let guard = engine.try_begin();
        assert!(guard.is_some());
        assert!(engine.try_begin().is_none());
        drop(guard);
        assert!(engine.try_begin().is_some());
    }
}
