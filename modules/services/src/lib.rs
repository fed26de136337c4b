//! Installed services from the platform service manager.
//!
//! Linux reads systemd through `systemctl`, macOS reads `launchctl list` and
//! Windows parses `sc query`. Each parser is pure so it can be tested against
//! captured output.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use surface_core::platform::run_command;
use surface_core::{CollectContext, Collector, Emitter, ResultType, ServiceObject};
use tracing::{debug, info};

#[derive(Debug, Default, Clone)]
pub struct ServicesCollector;

impl ServicesCollector {
    pub fn new() -> Self {
        Self
    }

    fn services(&self) -> Result<Vec<ServiceObject>> {
        if cfg!(target_os = "linux") {
            let units = run_command(
                "systemctl",
                &["list-units", "--type=service", "--all", "--no-pager", "--no-legend", "--plain"],
            )?;
            let files = match run_command(
                "systemctl",
                &["list-unit-files", "--type=service", "--no-pager", "--no-legend", "--plain"],
            ) {
                Ok(out) => parse_unit_files(&out),
                Err(e) => {
                    debug!(error = %e, "list-unit-files failed, start types unknown");
                    BTreeMap::new()
                }
            };
            Ok(parse_systemctl_units(&units, &files))
        } else if cfg!(target_os = "macos") {
            Ok(parse_launchctl(&run_command("launchctl", &["list"])?))
        } else if cfg!(target_os = "windows") {
            Ok(parse_sc_query(&run_command("sc", &["query", "state=", "all"])?))
        } else {
            Err(anyhow!("no service manager for this platform"))
        }
    }
}

impl Collector for ServicesCollector {
    fn name(&self) -> &'static str {
        "services"
    }

    fn kind(&self) -> ResultType {
        ResultType::Service
    }

    fn can_run_on_platform(&self) -> bool {
        cfg!(any(target_os = "linux", target_os = "macos", target_os = "windows"))
    }

    fn collect(&self, ctx: &CollectContext<'_>, out: &mut Emitter<'_>) -> Result<()> {
        let services = self.services()?;
        info!(run_id = ctx.run_id, services = services.len(), "enumerated services");
        for s in services {
            out.emit(s);
        }
        Ok(())
    }
}

/// Unit name to enablement state from `systemctl list-unit-files`.
pub fn parse_unit_files(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|l| {
            let mut cols = l.split_whitespace();
            let unit = cols.next()?;
            let state = cols.next()?;
            unit.ends_with(".service").then(|| (unit.to_string(), state.to_string()))
        })
        .collect()
}

/// Parses `systemctl list-units --plain --no-legend`: `UNIT LOAD ACTIVE SUB DESCRIPTION...`.
pub fn parse_systemctl_units(output: &str, unit_files: &BTreeMap<String, String>) -> Vec<ServiceObject> {
    let mut out = Vec::new();
    for line in output.lines() {
        // failed units are prefixed with a bullet even in plain mode on some versions
        let line = line.trim_start_matches(['●', '*', ' ']);
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 || !cols[0].ends_with(".service") {
            continue;
        }
        let unit = cols[0];
        let description = cols[4..].join(" ");
        out.push(ServiceObject {
            service_name: unit.to_string(),
            display_name: Some(unit.trim_end_matches(".service").to_string()),
            start_type: unit_files.get(unit).cloned(),
            current_state: Some(format!("{}/{}", cols[2], cols[3])),
            description: (!description.is_empty()).then_some(description),
        });
    }
    out
}

/// Parses `launchctl list`: `PID STATUS LABEL`, `-` for no pid.
pub fn parse_launchctl(output: &str) -> Vec<ServiceObject> {
    output
        .lines()
        .skip(1)
        .filter_map(|l| {
            let cols: Vec<&str> = l.split_whitespace().collect();
            if cols.len() < 3 {
                return None;
            }
            let state = if cols[0] == "-" { "stopped" } else { "running" };
            Some(ServiceObject {
                service_name: cols[2].to_string(),
                display_name: None,
                start_type: None,
                current_state: Some(state.to_string()),
                description: None,
            })
        })
        .collect()
}

/// Parses `sc query state= all`, one `SERVICE_NAME:` block per service.
pub fn parse_sc_query(output: &str) -> Vec<ServiceObject> {
    let mut out: Vec<ServiceObject> = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else { continue };
        let value = value.trim();
        match key.trim() {
            "SERVICE_NAME" => out.push(ServiceObject {
                service_name: value.to_string(),
                display_name: None,
                start_type: None,
                current_state: None,
                description: None,
            }),
            "DISPLAY_NAME" => {
                if let Some(s) = out.last_mut() {
                    s.display_name = Some(value.to_string());
                }
            }
            // "4  RUNNING" -> "RUNNING"
            "STATE" => {
                if let Some(s) = out.last_mut() {
                    s.current_state = value.split_whitespace().nth(1).map(String::from);
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_systemd_units_with_start_types() {
        let files = parse_unit_files(
            "ssh.service enabled enabled\ncron.service enabled enabled\nfoo.socket enabled enabled\n",
        );
        assert_eq!(files.len(), 2);
        let units = "\
ssh.service     loaded active   running OpenBSD Secure Shell server
cron.service    loaded inactive dead    Regular background program processing daemon
● bad.service   loaded failed   failed  Broken thing
dev-sda.device  loaded active   plugged SAMSUNG
";
        let v = parse_systemctl_units(units, &files);
        assert_eq!(v.len(), 3);
        assert_eq!(v[0].service_name, "ssh.service");
        assert_eq!(v[0].start_type.as_deref(), Some("enabled"));
        assert_eq!(v[0].current_state.as_deref(), Some("active/running"));
        assert_eq!(v[0].description.as_deref(), Some("OpenBSD Secure Shell server"));
        assert_eq!(v[1].current_state.as_deref(), Some("inactive/dead"));
        assert_eq!(v[2].service_name, "bad.service");
        assert_eq!(v[2].start_type, None);
    }

    #[test]
    fn parses_launchctl() {
        let v = parse_launchctl("PID\tStatus\tLabel\n-\t0\tcom.apple.foo\n412\t0\tcom.apple.bar\n");
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].current_state.as_deref(), Some("stopped"));
        assert_eq!(v[1].service_name, "com.apple.bar");
        assert_eq!(v[1].current_state.as_deref(), Some("running"));
    }

    #[test]
    fn parses_sc_query_blocks() {
        let text = "
SERVICE_NAME: AudioSrv
DISPLAY_NAME: Windows Audio
        TYPE               : 20  WIN32_SHARE_PROCESS
        STATE              : 4  RUNNING
                                (STOPPABLE, NOT_PAUSABLE, IGNORES_SHUTDOWN)
        WIN32_EXIT_CODE    : 0  (0x0)

SERVICE_NAME: Spooler
DISPLAY_NAME: Print Spooler
        STATE              : 1  STOPPED
";
        let v = parse_sc_query(text);
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].service_name, "AudioSrv");
        assert_eq!(v[0].display_name.as_deref(), Some("Windows Audio"));
        assert_eq!(v[0].current_state.as_deref(), Some("RUNNING"));
        assert_eq!(v[1].current_state.as_deref(), Some("STOPPED"));
    }
}
