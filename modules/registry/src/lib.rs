//! Windows registry keys read through `reg query /s`.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;
use surface_core::platform::run_command;
use surface_core::{CollectContext, Collector, Emitter, RegistryObject, ResultType};
use tracing::{info, warn};

/// Autostart locations collected when no keys are configured.
pub const DEFAULT_KEYS: &[&str] = &[
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Run",
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\RunOnce",
    r"HKLM\SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Run",
    r"HKCU\SOFTWARE\Microsoft\Windows\CurrentVersion\Run",
    r"HKCU\SOFTWARE\Microsoft\Windows\CurrentVersion\RunOnce",
    r"HKLM\SYSTEM\CurrentControlSet\Services",
];

#[derive(Debug, Clone)]
pub struct RegistryCollector {
    keys: Vec<String>,
}

impl Default for RegistryCollector {
    fn default() -> Self {
        Self::new(DEFAULT_KEYS.iter().map(|k| k.to_string()).collect())
    }
}

impl RegistryCollector {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl Collector for RegistryCollector {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn kind(&self) -> ResultType {
        ResultType::Registry
    }

    fn can_run_on_platform(&self) -> bool {
        cfg!(target_os = "windows")
    }

    fn collect(&self, ctx: &CollectContext<'_>, out: &mut Emitter<'_>) -> Result<()> {
        let mut failures = 0;
        for key in &self.keys {
            match run_command("reg", &["query", key, "/s"]) {
                Ok(text) => {
                    let objects = parse_reg_query(&text);
                    info!(run_id = ctx.run_id, key = %key, keys = objects.len(), "read registry hive");
                    for o in objects {
                        out.emit(o);
                    }
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "registry key unreadable");
                    failures += 1;
                }
            }
        }
        if failures > 0 && failures == self.keys.len() {
            bail!("none of the {} registry keys could be read", failures);
        }
        Ok(())
    }
}

fn value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^ {4}(.*?) {4}(REG_[A-Z0-9_]+)(?: {4}(.*))?$").expect("static regex")
    })
}

/// Parses the output of `reg query <key> /s` into one object per key. Values
/// map to `TYPE:data` and subkeys list the direct children that appear in the
/// same listing.
pub fn parse_reg_query(output: &str) -> Vec<RegistryObject> {
    let mut keys: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with("HKEY_") {
            let key = line.trim().to_string();
            if !keys.contains_key(&key) {
                order.push(key.clone());
            }
            keys.entry(key.clone()).or_default();
            current = Some(key);
            continue;
        }
        let (Some(key), Some(caps)) = (current.as_ref(), value_re().captures(line)) else { continue };
        let name = match &caps[1] {
            "" => "(Default)",
            n => n,
        };
        let data = caps.get(3).map_or("", |m| m.as_str());
        if let Some(values) = keys.get_mut(key) {
            values.insert(name.to_string(), format!("{}:{}", &caps[2], data));
        }
    }

    let mut children: HashMap<&str, Vec<String>> = HashMap::new();
    for key in &order {
        if let Some((parent, _)) = key.rsplit_once('\\') {
            children.entry(parent).or_default().push(key.clone());
        }
    }

    order
        .iter()
        .map(|key| RegistryObject {
            key: key.clone(),
            values: keys.remove(key).unwrap_or_default(),
            subkeys: children.remove(key.as_str()).unwrap_or_default(),
        })
        .collect()
}
