//! Single-instance PID file enforcement. No-op on Windows.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

#[cfg(unix)]
pub fn pid_init(pid_path: &Path) -> std::io::Result<()> {
    reap_stale_pid(pid_path);

    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(pid_path, std::process::id().to_string())?;
    thread::sleep(Duration::from_secs(2));
    Ok(())
}

/// Reads `pid_path`, and if it names a live process other than this one,
/// terminates it the same way `pid_init` would (SIGTERM, 5s escalation to
/// SIGKILL). Used both by `pid_init` and the autoclean sweep.
#[cfg(unix)]
pub fn reap_stale_pid(pid_path: &Path) {
    if let Ok(contents) = fs::read_to_string(pid_path) {
        if let Ok(old_pid) = contents.trim().parse::<i32>() {
            if old_pid > 0 && old_pid != std::process::id() as i32 {
                kill_and_wait(old_pid);
            }
        }
    }
}

#[cfg(unix)]
fn kill_and_wait(pid: i32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid);
    if kill(target, Signal::SIGTERM).is_err() {
        return;
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if kill(target, None).is_err() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    let _ = kill(target, Signal::SIGKILL);
}

#[cfg(windows)]
pub fn pid_init(_pid_path: &Path) -> std::io::Result<()> {
    Ok(())
}
