//! Local user accounts from the account databases.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use anyhow::{anyhow, Context, Result};
use surface_core::platform::run_command;
use surface_core::{CollectContext, Collector, Emitter, ResultType, UserAccountObject};
use tracing::{debug, info};

/// Groups whose members can become root.
const ADMIN_GROUPS: &[&str] = &["root", "sudo", "wheel", "admin"];

/// First uid handed to human accounts on most distributions.
const FIRST_LOCAL_UID: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

#[derive(Debug, Default, Clone)]
pub struct UserAccountsCollector;

impl UserAccountsCollector {
    pub fn new() -> Self {
        Self
    }

    fn accounts(&self) -> Result<Vec<UserAccountObject>> {
        let entries = if cfg!(target_os = "macos") {
            parse_dscacheutil(&run_command("dscacheutil", &["-q", "user"])?)
        } else {
            parse_passwd(&fs::read_to_string("/etc/passwd").context("reading /etc/passwd")?)
        };
        let groups = match fs::read_to_string("/etc/group") {
            Ok(text) => parse_group(&text),
            Err(e) => {
                debug!(error = %e, "no /etc/group, group membership left empty");
                Vec::new()
            }
        };
        // shadow is root-only; without it lock state comes from the shell alone
        let locked = fs::read_to_string("/etc/shadow").map(|s| parse_shadow_locked(&s)).unwrap_or_default();
        if entries.is_empty() {
            return Err(anyhow!("account database listed no users"));
        }
        Ok(build_accounts(&entries, &groups, &locked))
    }
}

impl Collector for UserAccountsCollector {
    fn name(&self) -> &'static str {
        "user_accounts"
    }

    fn kind(&self) -> ResultType {
        ResultType::User
    }

    fn can_run_on_platform(&self) -> bool {
        cfg!(unix)
    }

    fn collect(&self, ctx: &CollectContext<'_>, out: &mut Emitter<'_>) -> Result<()> {
        let accounts = self.accounts()?;
        info!(run_id = ctx.run_id, accounts = accounts.len(), "enumerated user accounts");
        for a in accounts {
            out.emit(a);
        }
        Ok(())
    }
}

pub fn parse_passwd(text: &str) -> Vec<PasswdEntry> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let f: Vec<&str> = l.split(':').collect();
            if f.len() < 7 {
                return None;
            }
            Some(PasswdEntry {
                name: f[0].to_string(),
                uid: f[2].to_string(),
                gid: f[3].to_string(),
                gecos: f[4].to_string(),
                home: f[5].to_string(),
                shell: f[6].to_string(),
            })
        })
        .collect()
}

/// Parses `dscacheutil -q user`: blank-line separated `key: value` blocks.
pub fn parse_dscacheutil(text: &str) -> Vec<PasswdEntry> {
    let mut out = Vec::new();
    let mut cur: BTreeMap<&str, &str> = BTreeMap::new();
    for line in text.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(name) = cur.get("name") {
                out.push(PasswdEntry {
                    name: name.to_string(),
                    uid: cur.get("uid").unwrap_or(&"").to_string(),
                    gid: cur.get("gid").unwrap_or(&"").to_string(),
                    gecos: cur.get("gecos").unwrap_or(&"").to_string(),
                    home: cur.get("dir").unwrap_or(&"").to_string(),
                    shell: cur.get("shell").unwrap_or(&"").to_string(),
                });
            }
            cur.clear();
            continue;
        }
        if let Some((k, v)) = line.split_once(':') {
            cur.insert(k.trim(), v.trim());
        }
    }
    out
}

/// `(group name, gid, members)` triples from `/etc/group`.
pub fn parse_group(text: &str) -> Vec<(String, String, Vec<String>)> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let f: Vec<&str> = l.split(':').collect();
            if f.len() < 4 {
                return None;
            }
            let members = f[3].split(',').map(str::trim).filter(|m| !m.is_empty()).map(String::from).collect();
            Some((f[0].to_string(), f[2].to_string(), members))
        })
        .collect()
}

/// Accounts whose shadow password field is locked (`!` or `*` prefix).
pub fn parse_shadow_locked(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|l| {
            let mut f = l.split(':');
            let name = f.next()?;
            let pw = f.next()?;
            (pw.starts_with('!') || pw.starts_with('*')).then(|| name.to_string())
        })
        .collect()
}

fn login_disabled(shell: &str) -> bool {
    shell.ends_with("/nologin") || shell.ends_with("/false") || shell.is_empty()
}

pub fn build_accounts(
    entries: &[PasswdEntry],
    groups: &[(String, String, Vec<String>)],
    locked: &BTreeSet<String>,
) -> Vec<UserAccountObject> {
    entries
        .iter()
        .map(|e| {
            let mut member_of: BTreeSet<String> = groups
                .iter()
                .filter(|(_, gid, members)| *gid == e.gid || members.contains(&e.name))
                .map(|(name, _, _)| name.clone())
                .collect();
            if member_of.is_empty() && !e.gid.is_empty() {
                member_of.insert(e.gid.clone());
            }
            let privileged = e.uid == "0" || member_of.iter().any(|g| ADMIN_GROUPS.contains(&g.as_str()));
            let system = e.uid.parse::<u32>().map_or(false, |u| u < FIRST_LOCAL_UID);
            let full_name = e.gecos.split(',').next().filter(|s| !s.is_empty()).map(String::from);
            UserAccountObject {
                name: e.name.clone(),
                uid: e.uid.clone(),
                gid: e.gid.clone(),
                full_name,
                home_directory: (!e.home.is_empty()).then(|| e.home.clone()),
                shell: (!e.shell.is_empty()).then(|| e.shell.clone()),
                account_type: if system { "system" } else { "local" }.to_string(),
                disabled: locked.contains(&e.name) || login_disabled(&e.shell),
                privileged,
                groups: member_of.into_iter().collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
# comment
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
alice:x:1000:1000:Alice Liddell,,,:/home/alice:/bin/zsh
broken:line
";

    const GROUP: &str = "\
root:x:0:
sudo:x:27:alice
alice:x:1000:
";

    #[test]
    fn parses_passwd_entries() {
        let v = parse_passwd(PASSWD);
        assert_eq!(v.len(), 3);
        assert_eq!(v[2].name, "alice");
        assert_eq!(v[2].shell, "/bin/zsh");
    }

    #[test]
    fn builds_accounts_with_groups_and_privilege() {
        let accounts = build_accounts(&parse_passwd(PASSWD), &parse_group(GROUP), &BTreeSet::new());
        let root = &accounts[0];
        assert!(root.privileged);
        assert_eq!(root.account_type, "system");

        let daemon = &accounts[1];
        assert_eq!(daemon.account_type, "system");
        assert!(daemon.disabled);
        assert_eq!(daemon.groups, vec!["1".to_string()]);

        let alice = &accounts[2];
        assert_eq!(alice.full_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(alice.groups, vec!["alice".to_string(), "sudo".to_string()]);
        assert!(alice.privileged);
        assert!(!alice.disabled);
    }

    #[test]
    fn shadow_lock_disables_account() {
        let locked = parse_shadow_locked("root:!:19000:0:99999:7:::\nalice:$6$salt$hash:19000::::::\n");
        assert!(locked.contains("root"));
        assert!(!locked.contains("alice"));
        let accounts = build_accounts(&parse_passwd(PASSWD), &[], &locked);
        assert!(accounts[0].disabled);
    }

    #[test]
    fn parses_dscacheutil_blocks() {
        let text = "name: root\npassword: *\nuid: 0\ngid: 0\ndir: /var/root\nshell: /bin/sh\ngecos: System Administrator\n\nname: bob\nuid: 501\ngid: 20\ndir: /Users/bob\nshell: /bin/zsh\n";
        let v = parse_dscacheutil(text);
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].home, "/var/root");
        assert_eq!(v[1].uid, "501");
        assert_eq!(v[1].gecos, "");
    }
}
