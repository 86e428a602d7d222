//! DNS cache flush and best-effort network reset.

use parking_lot::Mutex;
use std::process::Command;
use std::thread;
use std::time::Duration;

lazy_static::lazy_static! {
    static ref NETWORK_RESET_LOCK: Mutex<()> = Mutex::new(());
}

fn flush_cmd() -> Option<(&'static str, &'static [&'static str])> {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            Some(("ipconfig", &["/flushdns"]))
        } else if #[cfg(target_os = "macos")] {
            Some(("killall", &["-HUP", "mDNSResponder"]))
        } else if #[cfg(target_os = "linux")] {
            Some(("systemd-resolve", &["--flush-caches"]))
        } else {
            None
        }
    }
}

fn run_flush() {
    if let Some((bin, args)) = flush_cmd() {
        let _ = Command::new(bin).args(args).status();
    }
}

/// Invokes the platform flush command once, synchronously.
pub fn flush_dns_cache_sync() {
    run_flush();
}

/// Invokes the platform flush command once synchronously, then three more
/// times at 1-second intervals from a detached background thread.
pub fn flush_dns_cache_async() {
    run_flush();
    thread::spawn(|| {
        for _ in 0..3 {
            thread::sleep(Duration::from_secs(1));
            run_flush();
        }
    });
}

/// Best-effort platform sequence to flush routes, ARP, and DNS. Only one
/// reset runs at a time process-wide.
pub fn reset_networking() {
    let _guard = NETWORK_RESET_LOCK.lock();

    #[cfg(windows)]
    {
        let _ = Command::new("netsh").args(["interface", "ip", "delete", "arpcache"]).status();
        let _ = Command::new("ipconfig").arg("/flushdns").status();
        let _ = Command::new("ipconfig").arg("/registerdns").status();
        let _ = Command::new("arp").args(["-d", "*"]).status();
        let _ = Command::new("nbtstat").arg("-R").status();
    }

    #[cfg(target_os = "macos")]
    {
        reset_networking_macos();
    }

    #[cfg(target_os = "linux")]
    {
        let enabled = Command::new("nmcli")
            .arg("networking")
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "enabled")
            .unwrap_or(false);
        if enabled {
            let _ = Command::new("nmcli").args(["networking", "off"]).status();
            let _ = Command::new("nmcli").args(["networking", "on"]).status();
        }
    }

    run_flush();
}

#[cfg(target_os = "macos")]
fn reset_networking_macos() {
    const LOCATION: &str = "pritunl-reset";

    let current = Command::new("networksetup")
        .arg("-getcurrentlocation")
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_owned())
        .unwrap_or_default();
    if current == LOCATION {
        return;
    }

    let _ = Command::new("networksetup")
        .args(["-createlocation", LOCATION, "populate"])
        .status();
    let _ = Command::new("networksetup")
        .args(["-switchtolocation", LOCATION])
        .status();
    let _ = Command::new("route").args(["-n", "flush"]).status();
    let _ = Command::new("networksetup")
        .args(["-switchtolocation", &current])
        .status();
    let _ = Command::new("route").args(["-n", "flush"]).status();
    let _ = Command::new("networksetup")
        .args(["-deletelocation", LOCATION])
        .status();
    let _ = Command::new("route").args(["-n", "flush"]).status();
}
