//! avahi-browse backed discovery for Cast devices

use super::DiscoveryEvent;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration for avahi discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// DNS-SD service type to browse
    pub service_type: String,
    /// Browser binary
    pub browser: String,
    /// Delay before restarting a browser that exited
    pub restart_delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: "_googlecast._tcp".into(),
            browser: "avahi-browse".into(),
            restart_delay: Duration::from_secs(5),
        }
    }
}

/// Parser for `avahi-browse --parsable` output
///
/// Withdraw lines only carry the service name, so the parser remembers which
/// identity each resolved name announced, per interface. A device is only
/// withdrawn once the last interface that resolved it drops it.
#[derive(Debug, Default)]
pub struct AvahiParser {
    /// name -> interface -> identity
    identities: HashMap<String, HashMap<String, String>>,
}

impl AvahiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one output line into a discovery event
    pub fn parse_line(&mut self, line: &str) -> Option<DiscoveryEvent> {
        match line.chars().next()? {
            '=' => self.parse_resolved(line),
            '-' => self.parse_removed(line),
            _ => None,
        }
    }

    // =;iface;proto;name;type;domain;hostname;address;port;txt
    fn parse_resolved(&mut self, line: &str) -> Option<DiscoveryEvent> {
        let fields: Vec<&str> = line.splitn(10, ';').collect();
        if fields.len() < 9 || fields[2] != "IPv4" {
            return None;
        }

        let name = unescape(fields[3]);
        let host = fields[7].to_string();
        let port = fields[8].parse::<u16>().ok()?;
        let txt = fields.get(9).map(|t| parse_txt(t)).unwrap_or_default();
        let identity = txt
            .get("id")
            .filter(|id| !id.is_empty())
            .cloned()
            .unwrap_or_else(|| name.clone());

        self.identities
            .entry(name.clone())
            .or_default()
            .insert(fields[1].to_string(), identity.clone());
        Some(DiscoveryEvent::Announce {
            identity,
            host,
            port,
            name: txt.get("fn").cloned().unwrap_or(name),
        })
    }

    // -;iface;proto;name;type;domain
    fn parse_removed(&mut self, line: &str) -> Option<DiscoveryEvent> {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < 4 || fields[2] != "IPv4" {
            return None;
        }

        let name = unescape(fields[3]);
        let interfaces = self.identities.get_mut(&name)?;
        let identity = interfaces.remove(fields[1])?;
        if !interfaces.is_empty() {
            debug!("[DISCOVERY] {} gone from {}, still seen elsewhere", name, fields[1]);
            return None;
        }
        self.identities.remove(&name);
        Some(DiscoveryEvent::Withdraw { identity, name })
    }
}

/// Decode avahi's `\DDD` (decimal byte) and `\c` escapes
fn unescape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let digits = &bytes[i + 1..bytes.len().min(i + 4)];
            if digits.len() == 3 && digits.iter().all(u8::is_ascii_digit) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
            out.push(bytes[i + 1]);
            i += 2;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `"k=v" "k2=v2"` TXT records
fn parse_txt(raw: &str) -> HashMap<String, String> {
    let mut records = HashMap::new();
    let mut rest = raw;

    while let Some(start) = rest.find('"') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('"') else {
            break;
        };
        let entry = &after[..end];
        if let Some((key, value)) = entry.split_once('=') {
            records.insert(key.to_string(), value.to_string());
        }
        rest = &after[end + 1..];
    }

    records
}

/// Runs avahi-browse and forwards events
pub struct AvahiBrowser {
    config: DiscoveryConfig,
}

impl AvahiBrowser {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Start browsing in the background
    pub fn spawn(self, events: mpsc::Sender<DiscoveryEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.browse_loop(events).await })
    }

    /// Keep a browser process running; restart it whenever it exits
    async fn browse_loop(self, events: mpsc::Sender<DiscoveryEvent>) {
        loop {
            match self.browse_once(&events).await {
                Ok(()) => warn!("[DISCOVERY] {} exited", self.config.browser),
                Err(e) => error!("[DISCOVERY] {} failed: {}", self.config.browser, e),
            }

            if events.is_closed() {
                info!("[DISCOVERY] Event receiver dropped, stopping browser");
                return;
            }
            tokio::time::sleep(self.config.restart_delay).await;
        }
    }

    async fn browse_once(&self, events: &mpsc::Sender<DiscoveryEvent>) -> anyhow::Result<()> {
        info!(
            "[DISCOVERY] Browsing {} via {}",
            self.config.service_type, self.config.browser
        );

        let mut child = Command::new(&self.config.browser)
            .args(["--resolve", "--parsable", "--no-db-lookup"])
            .arg(&self.config.service_type)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("browser stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut parser = AvahiParser::new();

        while let Some(line) = lines.next_line().await? {
            if let Some(event) = parser.parse_line(&line) {
                debug!("[DISCOVERY] {:?}", event);
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }

        let status = child.wait().await?;
        debug!("[DISCOVERY] browser exit status: {}", status);
        Ok(())
    }
}
