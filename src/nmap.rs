// nmap.rs - Nmap invocation and output parsing
// Purpose: Host discovery sweep, per-host port/service/OS scan and
//          interface/route listing, parsed from Nmap's normal output

use crate::icons::get_icon;
use crate::logger::Logger;
use crate::model::{Host, Port};
use crate::system::{CommandSpec, SystemShell};
use anyhow::{Result, bail};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

lazy_static! {
    static ref TCP_PORT_LINE: Regex = Regex::new(r"^\d+/tcp").unwrap();
    static ref SERVICE_INFO_OS: Regex = Regex::new(r"OS: (.+)").unwrap();
}

/// Run nmap and return stdout; a non-zero exit is an error
pub async fn run_nmap<S: SystemShell + ?Sized>(shell: &S, logger: &Logger, args: &[String]) -> Result<String> {
    let spec = CommandSpec::new("nmap").args(args.iter().cloned());
    logger.debug(format!("Running command: {}", spec.display()));

    let outcome = shell.run(&spec).await?;
    if !outcome.success() {
        logger.error(format!("Command error: {} ({})", spec.display(), outcome.error_summary()));
        bail!("nmap failed: {}", outcome.error_summary());
    }
    Ok(outcome.stdout)
}

// ═══════════════════════════════════════════════════════════════════════════
// HOST DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════

pub fn ping_sweep_args(network: &str, scans_dir: &Path) -> Vec<String> {
    [
        "-sn",
        "-PE",        // ICMP echo
        "-PP",        // timestamp
        "-PM",        // netmask
        "-PS80,443",  // TCP SYN
        "-PA80,443",  // TCP ACK
        "-PU53",      // UDP
        "-T4",
        "--max-retries",
        "5",
        "--host-timeout",
        "30s",
        "--trace",
        "--reason",
        "-oA",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([
        scans_dir.join("host_scan").to_string_lossy().to_string(),
        "-v".to_string(),
        network.to_string(),
    ])
    .collect()
}

/// Live hosts in report order
pub fn parse_ping_sweep(stdout: &str) -> Vec<Host> {
    let lines: Vec<&str> = stdout.lines().collect();
    let mut hosts = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.contains("Nmap scan report for") || line.contains("down") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(last) = parts.last() else { continue };
        let mut host = Host::new(last.trim_matches(|c| c == '(' || c == ')'));
        if line.contains('(') && parts.len() >= 2 {
            host.hostname = Some(parts[parts.len() - 2].to_string());
        }

        for next_line in lines.iter().skip(i + 1).take(4) {
            if let Some((_, mac_part)) = next_line.split_once("MAC Address:") {
                let mut mac_parts = mac_part.splitn(2, '(');
                host.mac = mac_parts.next().map(|m| m.trim().to_string());
                host.vendor = mac_parts
                    .next()
                    .map(|v| v.trim_end().trim_end_matches(')').trim().to_string());
            } else if let Some((_, os)) = next_line.split_once("OS:") {
                host.os = Some(os.trim().to_string());
            }
        }

        hosts.push(host);
    }

    hosts
}

// ═══════════════════════════════════════════════════════════════════════════
// PORT SCAN
// ═══════════════════════════════════════════════════════════════════════════

pub fn port_scan_args(ip: &str, port_range: &str, scans_dir: &Path) -> Vec<String> {
    let output = scans_dir.join(format!("port_scan_{}", ip.replace('.', "-")));
    vec![
        "-p".to_string(),
        port_range.to_string(),
        "-T3".to_string(),
        "-sV".to_string(),
        "-O".to_string(),
        "--version-intensity".to_string(),
        "3".to_string(),
        "--open".to_string(),
        "--host-timeout".to_string(),
        "600s".to_string(),
        "-oA".to_string(),
        output.to_string_lossy().to_string(),
        ip.to_string(),
    ]
}

#[derive(Debug, Default, PartialEq)]
pub struct PortScanReport {
    pub ports: Vec<Port>,
    /// From the OS detection "Running:" line
    pub running_os: Option<String>,
    /// From "Service Info: OS: ..."
    pub service_os: Option<String>,
}

impl PortScanReport {
    /// OS detection wins; service info only fills a blank
    pub fn apply_to(self, host: &mut Host) {
        if let Some(os) = self.running_os {
            host.icon = Some(get_icon(Some(&os)));
            host.os = Some(os);
        } else if host.os.is_none() {
            if let Some(os) = self.service_os {
                host.icon = Some(get_icon(Some(&os)));
                host.os = Some(os);
            }
        }
        host.open_ports = self.ports;
    }
}

pub fn parse_port_scan(stdout: &str) -> PortScanReport {
    let mut report = PortScanReport::default();

    for line in stdout.lines() {
        if line.starts_with("Running") {
            if let Some(os) = line.split(':').nth(1) {
                report.running_os = Some(os.trim().to_string());
            }
        } else if line.starts_with("Service Info") {
            if report.service_os.is_none() {
                report.service_os = SERVICE_INFO_OS
                    .captures(line)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string());
            }
        } else if TCP_PORT_LINE.is_match(line) && line.contains("open") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }
            let Some(port) = parts[0].split('/').next().and_then(|p| p.parse::<u16>().ok()) else {
                continue;
            };
            report.ports.push(Port {
                port,
                state: parts[1].to_string(),
                service: parts[2].to_string(),
                version: (parts.len() > 3).then(|| parts[3..].join(" ")),
                http_response: None,
                screenshot: None,
            });
        }
    }

    report
}

// ═══════════════════════════════════════════════════════════════════════════
// INTERFACES & ROUTES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub interface: String,
    pub short_name: String,
    pub cidr: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: bool,
    pub mtu: Option<u32>,
    pub mac: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub network: String,
    pub interface: String,
    pub metric: u32,
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkList {
    pub interfaces: Vec<NetworkInterface>,
    pub routes: Vec<Route>,
    pub available_networks: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Interfaces,
    Routes,
}

/// Parse `nmap --iflist`
pub fn parse_iflist(stdout: &str) -> NetworkList {
    let mut list = NetworkList::default();
    let mut section = Section::None;

    for line in stdout.lines() {
        let line = line.trim();

        if line.contains("INTERFACES") {
            section = Section::Interfaces;
            continue;
        } else if line.contains("ROUTES") {
            section = Section::Routes;
            continue;
        }

        if line.is_empty() || line.contains("DEV") || line.contains("DST/MASK") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match section {
            Section::Interfaces if parts.len() >= 6 => {
                list.interfaces.push(NetworkInterface {
                    interface: parts[0].to_string(),
                    short_name: parts[1].trim_matches(|c| c == '(' || c == ')').to_string(),
                    cidr: parts[2].to_string(),
                    kind: parts[3].to_string(),
                    status: parts[4] == "up",
                    mtu: parts[5].parse().ok(),
                    mac: parts.get(6).map(|m| m.to_string()),
                });
            }
            Section::Routes if parts.len() >= 3 => {
                list.routes.push(Route {
                    network: parts[0].to_string(),
                    interface: parts[1].to_string(),
                    metric: parts[2].parse().unwrap_or(0),
                    gateway: parts.get(3).map(|g| g.to_string()),
                });
            }
            _ => {}
        }
    }

    list.available_networks = list
        .routes
        .iter()
        .filter(|r| r.network != "0.0.0.0/0")
        .map(|r| r.network.clone())
        .collect();
    list
}

/// Gateway of the default route in `nmap --iflist` output
pub fn default_gateway(stdout: &str) -> Option<String> {
    let mut in_routes = false;
    for line in stdout.lines() {
        if line.contains("ROUTES") {
            in_routes = true;
            continue;
        }
        if in_routes && line.contains("0.0.0.0/0") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 4 {
                return Some(parts[3].to_string());
            }
        }
    }
    None
}

pub async fn list_networks<S: SystemShell + ?Sized>(shell: &S, logger: &Logger) -> Result<NetworkList> {
    let stdout = run_nmap(shell, logger, &["--iflist".to_string()]).await?;
    Ok(parse_iflist(&stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWEEP: &str = "\
Starting Nmap 7.94 ( https://nmap.org ) at 2024-05-01 10:00 UTC
Nmap scan report for 192.168.1.10 [host down, received no-response]
Nmap scan report for router.lan (192.168.1.1)
Host is up, received arp-response (0.00031s latency).
MAC Address: AA:BB:CC:DD:EE:01 (Ubiquiti Networks)
Nmap scan report for 192.168.1.20
Host is up, received arp-response (0.00044s latency).
MAC Address: AA:BB:CC:DD:EE:14 (Unknown)
Nmap scan report for 192.168.1.3
Host is up, received localhost-response.
Nmap done: 256 IP addresses (3 hosts up) scanned in 2.51 seconds
";

    const PORTS: &str = "\
PORT     STATE SERVICE  VERSION
22/tcp   open  ssh      OpenSSH 9.6p1 Ubuntu 3ubuntu13 (Ubuntu Linux; protocol 2.0)
80/tcp   open  http     nginx 1.24.0
443/tcp  open  ssl/http nginx 1.24.0
8081/tcp open  unknown
MAC Address: AA:BB:CC:DD:EE:14 (Unknown)
Device type: general purpose
Running: Linux 4.X|5.X
OS CPE: cpe:/o:linux:linux_kernel:4 cpe:/o:linux:linux_kernel:5
Service Info: OS: Linux; CPE: cpe:/o:linux:linux_kernel
";

    const IFLIST: &str = "\
Starting Nmap 7.94 ( https://nmap.org )
************************INTERFACES************************
DEV  (SHORT) IP/MASK                     TYPE     UP MTU   MAC
lo   (lo)    127.0.0.1/8                 loopback up 65536
eth0 (eth0)  192.168.1.3/24              ethernet up 1500  02:42:AC:11:00:02

**************************ROUTES**************************
DST/MASK                      DEV  METRIC GATEWAY
192.168.1.0/24                eth0 0
0.0.0.0/0                     eth0 100    192.168.1.1
";

    #[test]
    fn test_parse_ping_sweep() {
        let hosts = parse_ping_sweep(SWEEP);
        assert_eq!(hosts.len(), 3);

        assert_eq!(hosts[0].ip, "192.168.1.1");
        assert_eq!(hosts[0].hostname.as_deref(), Some("router.lan"));
        assert_eq!(hosts[0].mac.as_deref(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(hosts[0].vendor.as_deref(), Some("Ubiquiti Networks"));

        assert_eq!(hosts[1].ip, "192.168.1.20");
        assert!(hosts[1].hostname.is_none());
        assert_eq!(hosts[1].vendor.as_deref(), Some("Unknown"));

        assert_eq!(hosts[2].ip, "192.168.1.3");
        assert!(hosts[2].mac.is_none());
    }

    #[test]
    fn test_parse_port_scan() {
        let report = parse_port_scan(PORTS);
        assert_eq!(report.ports.len(), 4);
        assert_eq!(report.ports[0].port, 22);
        assert_eq!(report.ports[0].service, "ssh");
        assert_eq!(
            report.ports[0].version.as_deref(),
            Some("OpenSSH 9.6p1 Ubuntu 3ubuntu13 (Ubuntu Linux; protocol 2.0)")
        );
        assert_eq!(report.ports[2].service, "ssl/http");
        assert!(report.ports[3].version.is_none());
        assert_eq!(report.running_os.as_deref(), Some("Linux 4.X|5.X"));
        assert_eq!(report.service_os.as_deref(), Some("Linux; CPE: cpe:/o:linux:linux_kernel"));
    }

    #[test]
    fn test_running_beats_service_info() {
        let mut host = Host::new("192.168.1.20");
        parse_port_scan(PORTS).apply_to(&mut host);
        assert_eq!(host.os.as_deref(), Some("Linux 4.X|5.X"));
        assert!(!host.icon.as_deref().unwrap_or_default().is_empty());
        assert_eq!(host.open_ports.len(), 4);
    }

    #[test]
    fn test_service_info_fills_blank_os_only() {
        let stdout = "3389/tcp open ms-wbt-server Microsoft Terminal Services\nService Info: OS: Windows; CPE: cpe:/o:microsoft:windows\n";

        let mut blank = Host::new("10.0.0.5");
        parse_port_scan(stdout).apply_to(&mut blank);
        assert_eq!(blank.os.as_deref(), Some("Windows; CPE: cpe:/o:microsoft:windows"));

        let mut known = Host::new("10.0.0.6");
        known.os = Some("FreeBSD".to_string());
        parse_port_scan(stdout).apply_to(&mut known);
        assert_eq!(known.os.as_deref(), Some("FreeBSD"));
    }

    #[test]
    fn test_closed_and_udp_lines_ignored() {
        let report = parse_port_scan("53/udp open domain\n25/tcp filtered smtp\n");
        assert!(report.ports.is_empty());
    }

    #[test]
    fn test_parse_iflist() {
        let list = parse_iflist(IFLIST);

        assert_eq!(list.interfaces.len(), 2);
        assert_eq!(list.interfaces[0].interface, "lo");
        assert_eq!(list.interfaces[0].mtu, Some(65536));
        assert!(list.interfaces[0].mac.is_none());
        assert_eq!(list.interfaces[1].short_name, "eth0");
        assert_eq!(list.interfaces[1].kind, "ethernet");
        assert!(list.interfaces[1].status);
        assert_eq!(list.interfaces[1].mac.as_deref(), Some("02:42:AC:11:00:02"));

        assert_eq!(list.routes.len(), 2);
        assert_eq!(list.routes[1].metric, 100);
        assert_eq!(list.routes[1].gateway.as_deref(), Some("192.168.1.1"));
        assert_eq!(list.available_networks, vec!["192.168.1.0/24".to_string()]);

        let json = serde_json::to_value(&list.interfaces[1]).unwrap();
        assert_eq!(json["type"], "ethernet");
    }

    #[test]
    fn test_default_gateway() {
        assert_eq!(default_gateway(IFLIST).as_deref(), Some("192.168.1.1"));
        assert!(default_gateway("**ROUTES**\n10.0.0.0/8 eth0 0\n").is_none());
    }

    #[test]
    fn test_scan_args_write_into_scans_dir() {
        let args = port_scan_args("10.0.0.7", "1-65535", Path::new("scans"));
        assert!(args.contains(&"scans/port_scan_10-0-0-7".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("10.0.0.7"));

        let args = ping_sweep_args("10.0.0.0/24", Path::new("scans"));
        assert_eq!(args.first().map(String::as_str), Some("-sn"));
        assert!(args.contains(&"scans/host_scan".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("10.0.0.0/24"));
    }
}
