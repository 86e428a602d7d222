//! TAP adapter leasing on Windows: `ipconfig /all` is parsed
//! for `Ethernet adapter …` / `TAP-Windows Adapter` / `Physical Address`
//! triples, and the first unleased adapter's name is handed out.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::process::Command;

lazy_static::lazy_static! {
    static ref LOCKED_INTERFACES: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapAdapter {
    pub name: String,
    pub mac: String,
}

fn list_taps() -> Result<Vec<TapAdapter>> {
    let output = Command::new("ipconfig")
        .arg("/all")
        .output()
        .map_err(Error::Io)?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_ipconfig(&text))
}

fn parse_ipconfig(text: &str) -> Vec<TapAdapter> {
    let mut adapters = Vec::new();
    let mut current_name: Option<String> = None;
    let mut is_tap = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Ethernet adapter ") {
            if let Some(name) = trimmed
                .trim_start_matches("Ethernet adapter ")
                .trim_end_matches(':')
                .get(..)
            {
                current_name = Some(name.trim_matches('"').to_owned());
            }
            is_tap = false;
            continue;
        }
        if trimmed.contains("TAP-Windows Adapter") {
            is_tap = true;
            continue;
        }
        if is_tap && trimmed.starts_with("Physical Address") {
            if let Some((_, mac)) = trimmed.split_once(':') {
                if let Some(name) = current_name.take() {
                    adapters.push(TapAdapter {
                        name,
                        mac: mac.trim().to_owned(),
                    });
                }
                is_tap = false;
            }
        }
    }

    adapters.sort_by(|a, b| a.name.cmp(&b.name));
    adapters
}

/// Returns the first TAP adapter whose MAC is not currently leased, and
/// adds it to the process-wide leased set.
pub fn acquire_tap() -> Result<TapAdapter> {
    let taps = list_taps()?;
    let mut locked = LOCKED_INTERFACES.lock();
    for tap in taps {
        if !locked.contains(&tap.mac) {
            locked.insert(tap.mac.clone());
            return Ok(tap);
        }
    }
    Err(Error::NoTapAvailable)
}

pub fn release_tap(tap: &TapAdapter) {
    LOCKED_INTERFACES.lock().remove(&tap.mac);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\nEthernet adapter Local Area Connection 3:\n\n   Connection-specific DNS Suffix  . :\n   Description . . . . . . . . . . : TAP-Windows Adapter V9\n   Physical Address. . . . . . . . : 00-FF-AA-BB-CC-01\n\nEthernet adapter Ethernet:\n\n   Description . . . . . . . . . . : Realtek PCIe GbE Family Controller\n   Physical Address. . . . . . . . : 00-11-22-33-44-55\n";

    #[test]
    fn parse_ipconfig_finds_only_tap_adapters() {
        let adapters = parse_ipconfig(SAMPLE);
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name, "Local Area Connection 3");
        assert_eq!(adapters[0].mac, "00-FF-AA-BB-CC-01");
    }
}
