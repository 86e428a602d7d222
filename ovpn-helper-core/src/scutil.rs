//! macOS `scutil` primitives and DNS backup/restore.
//!
//! Every call here shells out to `/usr/sbin/scutil`, feeding it a scripted
//! stdin session (`open`, one or more of `show|get|set|remove|list`,
//! `quit`) and reading its stdout back. One process per session.
//!
//! The System Configuration API is deliberately not used: scutil's
//! text format is the actual compatibility surface.

#![cfg(target_os = "macos")]

use crate::error::{Error, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

const SCUTIL_BIN: &str = "/usr/sbin/scutil";

fn run_script(script: &str) -> Result<String> {
    let mut child = Command::new(SCUTIL_BIN)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(Error::Scutil)?;

    {
        let stdin = child.stdin.as_mut().expect("piped stdin");
        stdin
            .write_all(format!("open\n{}\nquit\n", script).as_bytes())
            .map_err(Error::Scutil)?;
    }

    let output = child.wait_with_output().map_err(Error::Scutil)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `show <scope>:<key>`, returning the raw plist-text blob, or `None` if
/// the key does not exist (scutil prints `No such key`).
pub fn get_key(scope: &str, key: &str) -> Result<Option<String>> {
    let out = run_script(&format!("show {}:{}", scope, key))?;
    if out.contains("No such key") {
        Ok(None)
    } else {
        Ok(Some(out))
    }
}

pub fn remove_key(scope: &str, key: &str) -> Result<()> {
    run_script(&format!("remove {}:{}", scope, key)).map(|_| ())
}

/// Reads `src` and writes it back verbatim under `dst` via `scutil`'s `set`.
pub fn copy_key(src_scope: &str, src_key: &str, dst_scope: &str, dst_key: &str) -> Result<()> {
    match get_key(src_scope, src_key)? {
        Some(blob) => set_key(dst_scope, dst_key, &blob),
        None => Ok(()),
    }
}

fn set_key(scope: &str, key: &str, blob: &str) -> Result<()> {
    let script = format!("d.init\n{}d.set {}:{}", dict_fragment(blob), scope, key);
    run_script(&script).map(|_| ())
}

/// Translates a scutil `show` text blob's top-level `<key> : <value>` lines
/// into `d.add` statements against the implicit dictionary being built.
/// scutil's own plist-text format is line-oriented and round-trips through
/// `d.add key value` for scalar entries and nested `array {}` for arrays.
fn dict_fragment(blob: &str) -> String {
    let mut out = String::new();
    for line in blob.lines() {
        let line = line.trim();
        if line.is_empty() || line == "<dictionary> {" || line == "}" {
            continue;
        }
        if let Some((key, value)) = line.split_once(" : ") {
            out.push_str(&format!("d.add {} {}\n", key.trim(), value.trim()));
        }
    }
    out
}

/// Retries up to 20x250ms to find `PrimaryService :` in
/// `State:/Network/Global/IPv4`.
pub fn get_primary_service() -> Result<String> {
    for _ in 0..20 {
        if let Some(blob) = get_key("State", "/Network/Global/IPv4")? {
            for line in blob.lines() {
                let line = line.trim();
                if let Some(rest) = line.strip_prefix("PrimaryService :") {
                    return Ok(rest.trim().to_owned());
                }
            }
        }
        thread::sleep(Duration::from_millis(250));
    }
    Err(Error::NoPrimaryService)
}

/// Enumerates `State:/Network/Pritunl/Connection/*` ids from scutil's
/// `list` output.
pub fn connection_ids() -> Result<Vec<String>> {
    let out = run_script("list")?;
    let prefix = "State:/Network/Pritunl/Connection/";
    let mut ids = Vec::new();
    for line in out.lines() {
        if let Some(idx) = line.find(prefix) {
            let rest = &line[idx + prefix.len()..];
            let id = rest.split_whitespace().next().unwrap_or("").to_owned();
            if !id.is_empty() {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

fn is_pritunl_tagged(blob: &str) -> bool {
    blob.lines()
        .any(|l| l.trim() == "Pritunl : true")
}

/// Copies `State:/Network/Service/<svc>/DNS` into
/// `State:/Network/Pritunl/Restore/<svc>` unless missing or already tagged,
/// and likewise copies `Setup:/Network/Service/<svc>/DNS` into
/// `Setup:/Network/Pritunl/Restore/<svc>`.
pub fn backup_dns(svc: &str) -> Result<()> {
    let state_key = format!("/Network/Service/{}/DNS", svc);
    let restore_key = format!("/Network/Pritunl/Restore/{}", svc);

    match get_key("State", &state_key)? {
        Some(blob) if !is_pritunl_tagged(&blob) => {
            copy_key("State", &state_key, "State", &restore_key)?;
        }
        _ => {}
    }

    let setup_key = format!("/Network/Service/{}/DNS", svc);
    match get_key("Setup", &setup_key)? {
        Some(blob) if !is_pritunl_tagged(&blob) => {
            copy_key("Setup", &setup_key, "Setup", &restore_key)?;
        }
        None => {
            let _ = remove_key("Setup", &restore_key);
        }
        _ => {}
    }

    Ok(())
}

/// Restores the backed-up DNS state for `svc` if the live key is currently
/// tagged `Pritunl : true`, then flushes the DNS cache.
pub fn restore_dns(svc: &str) -> Result<()> {
    let state_key = format!("/Network/Service/{}/DNS", svc);
    let restore_key = format!("/Network/Pritunl/Restore/{}", svc);

    if let Some(restore_blob) = get_key("State", &restore_key)? {
        if let Some(live) = get_key("State", &state_key)? {
            if is_pritunl_tagged(&live) {
                set_key("State", &state_key, &restore_blob)?;
            }
        }
        remove_key("State", &restore_key)?;
    }

    let setup_key = format!("/Network/Service/{}/DNS", svc);
    match get_key("Setup", &restore_key)? {
        Some(restore_blob) => {
            set_key("Setup", &setup_key, &restore_blob)?;
            remove_key("Setup", &restore_key)?;
        }
        None => {
            remove_key("Setup", &setup_key)?;
        }
    }

    crate::network::flush_dns_cache_sync();
    Ok(())
}

/// Copies `State:<src>` into both the `State` and `Setup` DNS keys of the
/// primary service.
pub fn copy_dns(src: &str) -> Result<()> {
    let svc = get_primary_service()?;
    let dst = format!("/Network/Service/{}/DNS", svc);
    copy_key("State", src, "State", &dst)?;
    copy_key("State", src, "Setup", &dst)?;
    Ok(())
}

/// Removes every `State:/Network/Pritunl/*` key except under `/Restore/`.
pub fn clear_pritunl_keys() -> Result<()> {
    let out = run_script("list")?;
    let prefix = "State:/Network/Pritunl/";
    let restore_prefix = "State:/Network/Pritunl/Restore/";

    let mut script = String::new();
    for line in out.lines() {
        if let Some(idx) = line.find(prefix) {
            let key = &line[idx..];
            let key = key.split_whitespace().next().unwrap_or("");
            if key.starts_with(restore_prefix) {
                continue;
            }
            if let Some(path) = key.strip_prefix("State:") {
                script.push_str(&format!("remove State:{}\n", path));
            }
        }
    }
    if !script.is_empty() {
        run_script(&script)?;
    }
    Ok(())
}

/// Parses an scutil DNS blob's `SearchDomains` and `ServerAddresses`
/// arrays, skipping any array whose key is `Pritunl`, and filtering out
/// IPv6 addresses (those containing `:`).
pub fn parse_dns(blob: &str) -> (Vec<String>, Vec<String>) {
    let mut search_domains = Vec::new();
    let mut server_addresses = Vec::new();
    let mut current: Option<&'static str> = None;
    let mut skip_pritunl = false;

    for line in blob.lines() {
        let trimmed = line.trim();
        if trimmed.contains("Pritunl") && trimmed.contains("array") {
            skip_pritunl = true;
            continue;
        }
        if trimmed.starts_with("SearchDomains") && trimmed.contains("array") {
            current = Some("search");
            skip_pritunl = false;
            continue;
        }
        if trimmed.starts_with("ServerAddresses") && trimmed.contains("array") {
            current = Some("server");
            skip_pritunl = false;
            continue;
        }
        if trimmed == "}" {
            current = None;
            continue;
        }
        if skip_pritunl {
            continue;
        }
        if let Some(which) = current {
            if let Some((_, value)) = trimmed.split_once(" : ") {
                let value = value.trim();
                match which {
                    "search" => search_domains.push(value.to_owned()),
                    "server" => {
                        if !value.contains(':') {
                            server_addresses.push(value.to_owned());
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    (search_domains, server_addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dns_extracts_domains_and_ipv4_only_servers() {
        let blob = "<dictionary> {\n  SearchDomains : <array> {\n    0 : example.com\n  }\n  ServerAddresses : <array> {\n    0 : 10.0.0.1\n    1 : fe80::1\n  }\n}\n";
        let (domains, servers) = parse_dns(blob);
        assert_eq!(domains, vec!["example.com".to_string()]);
        assert_eq!(servers, vec!["10.0.0.1".to_string()]);
    }
}
