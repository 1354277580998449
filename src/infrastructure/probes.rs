//! Network discovery probes.
//!
//! Each probe shells out to platform tooling or speaks a LAN protocol
//! directly. A probe that lacks privileges or tooling logs the problem and
//! reports nothing.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::net::UdpSocket;
use tokio::process::Command;
use uuid::Uuid;

use crate::domain::{generic_name, DiscoveredDevice, DiscoveryConfig, Probe};

use super::network::{local_ipv4, subnet_hosts};

/// Per-invocation limit for reverse lookups and single pings.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

const SSDP_ADDR: &str = "239.255.255.250:1900";

/// Runs a command and returns its stdout when it exits successfully.
async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            tracing::debug!(program, error = %e, "Command could not be started");
            None
        }
        Err(_) => None,
    }
}

fn short_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &uuid[..8])
}

/// One parsed address-resolution entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: IpAddr,
    pub mac: String,
}

fn looks_like_mac(token: &str) -> bool {
    let parts: Vec<&str> = token.split([':', '-']).collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parses `arp -a` output in BSD/Linux (`? (ip) at mac ...`) or Windows
/// (`ip  mac  dynamic`) layout. Incomplete entries are skipped.
#[must_use]
pub fn parse_arp_table(output: &str) -> Vec<ArpEntry> {
    let mut entries = Vec::new();

    for line in output.lines() {
        let line = line.trim();

        // BSD / Linux
        if let (Some(open), Some(close)) = (line.find('('), line.find(')')) {
            if open < close {
                let ip = line[open + 1..close].parse::<IpAddr>();
                let mac = line[close..]
                    .split_whitespace()
                    .skip_while(|t| *t != "at")
                    .nth(1);
                if let (Ok(ip), Some(mac)) = (ip, mac) {
                    if looks_like_mac(mac) {
                        entries.push(ArpEntry {
                            ip,
                            mac: mac.to_lowercase(),
                        });
                    }
                }
                continue;
            }
        }

        // Windows
        let mut tokens = line.split_whitespace();
        if let (Some(ip), Some(mac)) = (tokens.next(), tokens.next()) {
            if let Ok(ip) = ip.parse::<IpAddr>() {
                if looks_like_mac(mac) {
                    entries.push(ArpEntry {
                        ip,
                        mac: mac.replace('-', ":").to_lowercase(),
                    });
                }
            }
        }
    }

    entries
}

/// Extracts the hostname from `host <ip>` output.
#[must_use]
pub fn parse_host_lookup(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.split("domain name pointer ")
            .nth(1)
            .map(|name| name.trim().trim_end_matches('.').to_string())
            .filter(|name| !name.is_empty())
    })
}

/// Reads the operating system's address-resolution table.
pub struct ArpProbe {
    resolve_hostnames: bool,
}

impl ArpProbe {
    #[must_use]
    pub const fn new(resolve_hostnames: bool) -> Self {
        Self { resolve_hostnames }
    }

    async fn reverse_lookup(ip: IpAddr) -> Option<String> {
        let output = run_command("host", &[&ip.to_string()], COMMAND_TIMEOUT).await?;
        parse_host_lookup(&output)
    }
}

#[async_trait]
impl Probe for ArpProbe {
    fn name(&self) -> &'static str {
        "arp"
    }

    async fn scan(&self) -> Vec<DiscoveredDevice> {
        let Some(output) = run_command("arp", &["-a"], COMMAND_TIMEOUT * 2).await else {
            tracing::warn!("ARP table scan unavailable on this host");
            return Vec::new();
        };

        let entries = parse_arp_table(&output);
        let resolve = self.resolve_hostnames;

        stream::iter(entries)
            .map(|entry| async move {
                let name = if resolve {
                    Self::reverse_lookup(entry.ip).await
                } else {
                    None
                };
                DiscoveredDevice::online(
                    short_id("net"),
                    name.unwrap_or_else(|| generic_name(entry.ip)),
                    entry.ip,
                )
                .with_mac(entry.mac)
                .with_confidence(80)
            })
            .buffer_unordered(16)
            .collect()
            .await
    }
}

/// ICMP sweep of the local /24.
pub struct PingSweepProbe {
    concurrency: usize,
}

impl PingSweepProbe {
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    async fn ping(ip: Ipv4Addr) -> bool {
        let target = ip.to_string();
        let args = if cfg!(windows) {
            vec!["-n", "1", "-w", "1000", target.as_str()]
        } else {
            vec!["-c", "1", "-W", "1", target.as_str()]
        };
        run_command("ping", &args, COMMAND_TIMEOUT).await.is_some()
    }
}

#[async_trait]
impl Probe for PingSweepProbe {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn scan(&self) -> Vec<DiscoveredDevice> {
        let Some(local) = local_ipv4() else {
            tracing::warn!("No LAN interface found, skipping ping sweep");
            return Vec::new();
        };

        stream::iter(subnet_hosts(local))
            .map(|ip| async move { Self::ping(ip).await.then_some(ip) })
            .buffer_unordered(self.concurrency)
            .filter_map(|hit| async move { hit })
            .map(|ip| {
                let ip = IpAddr::V4(ip);
                DiscoveredDevice::online(short_id("ping"), generic_name(ip), ip)
                    .with_confidence(40)
            })
            .collect()
            .await
    }
}

/// Extracts a header value from an SSDP response.
#[must_use]
pub fn ssdp_header<'a>(response: &'a str, header: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case(header)
            .then(|| value.trim())
            .filter(|v| !v.is_empty())
    })
}

/// UPnP service discovery over SSDP multicast.
pub struct SsdpProbe {
    window: Duration,
}

impl SsdpProbe {
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self { window }
    }

    async fn search(&self) -> std::io::Result<HashMap<IpAddr, Option<String>>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let request = format!(
            "M-SEARCH * HTTP/1.1\r\nHOST: {SSDP_ADDR}\r\nMAN: \"ssdp:discover\"\r\nMX: 1\r\nST: ssdp:all\r\n\r\n"
        );
        socket.send_to(request.as_bytes(), SSDP_ADDR).await?;

        let mut found = HashMap::new();
        let mut buf = [0u8; 2048];
        let deadline = tokio::time::Instant::now() + self.window;

        loop {
            let (len, from) =
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => break,
                };
            let response = String::from_utf8_lossy(&buf[..len]);
            let server = ssdp_header(&response, "SERVER").map(str::to_string);
            found
                .entry(from.ip())
                .and_modify(|name: &mut Option<String>| {
                    if name.is_none() {
                        name.clone_from(&server);
                    }
                })
                .or_insert(server);
        }

        Ok(found)
    }
}

#[async_trait]
impl Probe for SsdpProbe {
    fn name(&self) -> &'static str {
        "upnp"
    }

    async fn scan(&self) -> Vec<DiscoveredDevice> {
        match self.search().await {
            Ok(found) => found
                .into_iter()
                .map(|(ip, server)| {
                    let confidence = if server.is_some() { 60 } else { 30 };
                    DiscoveredDevice::online(
                        short_id("upnp"),
                        server.unwrap_or_else(|| generic_name(ip)),
                        ip,
                    )
                    .with_confidence(confidence)
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "SSDP search failed");
                Vec::new()
            }
        }
    }
}

/// Multicast-DNS discovery. No resolver is bundled yet, so this probe
/// contributes nothing until a platform responder is wired in.
pub struct MdnsProbe;

#[async_trait]
impl Probe for MdnsProbe {
    fn name(&self) -> &'static str {
        "mdns"
    }

    async fn scan(&self) -> Vec<DiscoveredDevice> {
        tracing::debug!("mDNS discovery not available on this platform");
        Vec::new()
    }
}

/// The default probe set for a configuration.
#[must_use]
pub fn default_probes(config: &DiscoveryConfig) -> Vec<std::sync::Arc<dyn Probe>> {
    vec![
        std::sync::Arc::new(ArpProbe::new(config.resolve_hostnames)),
        std::sync::Arc::new(PingSweepProbe::new(config.ping_concurrency)),
        std::sync::Arc::new(MdnsProbe),
        std::sync::Arc::new(SsdpProbe::new(Duration::from_millis(config.ssdp_window_ms))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arp_unix() {
        let output = "\
? (192.168.1.1) at 00:11:22:33:44:55 on en0 ifscope [ethernet]
router.lan (192.168.1.20) at a4:5e:60:e1:2b:3c [ether] on wlan0
? (192.168.1.30) at <incomplete> on wlan0
";
        let entries = parse_arp_table(output);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ip, "192.168.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(entries[1].mac, "a4:5e:60:e1:2b:3c");
    }

    #[test]
    fn test_parse_arp_windows() {
        let output = "\
Interface: 192.168.0.10 --- 0x4
  Internet Address      Physical Address      Type
  192.168.0.1           00-11-22-33-44-55     dynamic
  192.168.0.255         ff-ff-ff-ff-ff-ff     static
";
        let entries = parse_arp_table(output);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].mac, "00:11:22:33:44:55");
    }

    #[test]
    fn test_parse_host_lookup() {
        let output = "20.1.168.192.in-addr.arpa domain name pointer nas.local.\n";
        assert_eq!(parse_host_lookup(output), Some("nas.local".to_string()));
        assert_eq!(parse_host_lookup("Host not found: 3(NXDOMAIN)"), None);
    }

    #[test]
    fn test_ssdp_header_is_case_insensitive() {
        let response = "HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=1800\r\nserver: Linux/5.4 UPnP/1.0 Roku/9.4\r\n\r\n";
        assert_eq!(
            ssdp_header(response, "SERVER"),
            Some("Linux/5.4 UPnP/1.0 Roku/9.4")
        );
        assert_eq!(ssdp_header(response, "LOCATION"), None);
    }

    #[tokio::test]
    async fn test_mdns_stub_is_empty() {
        assert!(MdnsProbe.scan().await.is_empty());
    }
}
