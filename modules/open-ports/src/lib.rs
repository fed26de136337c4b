//! Listening sockets from `ss`, `lsof` or `netstat`.

use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;
use surface_core::platform::run_command;
use surface_core::{CollectContext, Collector, Emitter, OpenPortObject, ResultType};
use tracing::{debug, info};

const V4: &str = "InterNetwork";
const V6: &str = "InterNetworkV6";

#[derive(Debug, Default, Clone)]
pub struct OpenPortsCollector;

impl OpenPortsCollector {
    pub fn new() -> Self {
        Self
    }

    fn listeners(&self) -> Result<Vec<OpenPortObject>> {
        if cfg!(target_os = "linux") {
            // process names need privileges; fall back to the plain listing
            match run_command("ss", &["-lntup"]) {
                Ok(out) => Ok(parse_ss(&out)),
                Err(e) => {
                    debug!(error = %e, "ss -lntup failed, retrying without process info");
                    Ok(parse_ss(&run_command("ss", &["-lntu"])?))
                }
            }
        } else if cfg!(target_os = "macos") {
            Ok(parse_lsof(&run_command("lsof", &["-Pn", "-i4", "-i6", "+c", "0"])?))
        } else if cfg!(target_os = "windows") {
            Ok(parse_netstat(&run_command("netstat", &["-ano"])?))
        } else {
            Err(anyhow!("no port source for this platform"))
        }
    }
}

impl Collector for OpenPortsCollector {
    fn name(&self) -> &'static str {
        "open_ports"
    }

    fn kind(&self) -> ResultType {
        ResultType::Port
    }

    fn can_run_on_platform(&self) -> bool {
        cfg!(any(target_os = "linux", target_os = "macos", target_os = "windows"))
    }

    fn collect(&self, ctx: &CollectContext<'_>, out: &mut Emitter<'_>) -> Result<()> {
        let ports = self.listeners()?;
        info!(run_id = ctx.run_id, listeners = ports.len(), "enumerated listening sockets");
        for p in ports {
            out.emit(p);
        }
        Ok(())
    }
}

/// Splits `addr:port`, stripping IPv6 brackets and `%iface` zone suffixes.
fn split_endpoint(s: &str) -> Option<(String, u16)> {
    let (addr, port) = s.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let addr = addr.trim_start_matches('[').trim_end_matches(']');
    let addr = addr.split('%').next().unwrap_or(addr);
    Some((addr.to_string(), port))
}

fn family_of(addr: &str) -> &'static str {
    if addr.contains(':') {
        V6
    } else {
        V4
    }
}

fn ss_process_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"users:\(\("([^"]+)""#).expect("static regex"))
}

/// Parses `ss -lntu[p]` output.
pub fn parse_ss(output: &str) -> Vec<OpenPortObject> {
    let mut out = Vec::new();
    for line in output.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 5 {
            continue;
        }
        let transport = match cols[0] {
            "tcp" => "tcp",
            "udp" => "udp",
            _ => continue,
        };
        let Some((address, port)) = split_endpoint(cols[4]) else { continue };
        let process_name = ss_process_re().captures(line).map(|c| c[1].to_string());
        out.push(OpenPortObject {
            family: family_of(&address).to_string(),
            address,
            transport: transport.to_string(),
            port,
            process_name,
        });
    }
    out
}

/// Parses `lsof -Pn -i4 -i6` output, keeping TCP listeners and unconnected UDP sockets.
pub fn parse_lsof(output: &str) -> Vec<OpenPortObject> {
    let mut out = Vec::new();
    for line in output.lines().skip(1) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 9 {
            continue;
        }
        let transport = match cols[7] {
            "TCP" if cols.get(9) == Some(&"(LISTEN)") => "tcp",
            "UDP" => "udp",
            _ => continue,
        };
        let name = cols[8];
        if name.contains("->") {
            continue;
        }
        let Some((address, port)) = split_endpoint(name) else { continue };
        let family = if cols[4] == "IPv6" { V6 } else { V4 };
        out.push(OpenPortObject {
            family: family.to_string(),
            address,
            transport: transport.to_string(),
            port,
            process_name: Some(cols[0].replace("\\x20", " ")),
        });
    }
    out
}

/// Parses Windows `netstat -ano` output.
pub fn parse_netstat(output: &str) -> Vec<OpenPortObject> {
    let mut out = Vec::new();
    for line in output.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let transport = match cols.first() {
            Some(&"TCP") if cols.get(3) == Some(&"LISTENING") => "tcp",
            Some(&"UDP") => "udp",
            _ => continue,
        };
        let Some((address, port)) = cols.get(1).and_then(|s| split_endpoint(s)) else { continue };
        out.push(OpenPortObject {
            family: family_of(&address).to_string(),
            address,
            transport: transport.to_string(),
            port,
            process_name: None,
        });
    }
    out
}
