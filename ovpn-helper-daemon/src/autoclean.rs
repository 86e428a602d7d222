//! Orphaned temp-file and stale-PID sweep, run on daemon startup and on
//! every `POST /stop`.

use lazy_static::lazy_static;
use ovpn_helper_core::paths::Paths;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

lazy_static! {
    static ref TEMP_FILE_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9_-]+(\.auth|-up\.sh|-down\.sh|-block\.sh)?$").unwrap();
}

/// Deletes every file directly under the temp directory that matches the
/// profile-temp-file naming pattern and isn't in `claimed` (the union of
/// every registered profile's `rem_paths`).
pub fn sweep_temp_files(paths: &Paths, claimed: &HashSet<PathBuf>) {
    let dir = paths.temp_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("autoclean: failed to read temp dir {:?}: {}", dir, err);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if claimed.contains(&path) {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if !TEMP_FILE_PATTERN.is_match(name) {
            continue;
        }
        if let Err(err) = fs::remove_file(&path) {
            log::warn!("autoclean: failed to remove orphaned temp file {:?}: {}", path, err);
        } else {
            log::debug!("autoclean: removed orphaned temp file {:?}", path);
        }
    }
}

/// POSIX-only: if the PID file names a process that isn't this daemon,
/// terminate it the same way `pid_init` would. The registered-profile
/// OpenVPN child processes are tracked separately by the supervisor and
/// never written to the PID file, so anything found there is necessarily
/// stale.
#[cfg(unix)]
pub fn sweep_stale_pid(paths: &Paths) {
    ovpn_helper_core::pid::reap_stale_pid(&paths.pid_path());
}

#[cfg(windows)]
pub fn sweep_stale_pid(_paths: &Paths) {}

/// Runs both sweeps.
pub fn run(paths: &Paths, claimed: &HashSet<PathBuf>) {
    sweep_temp_files(paths, claimed);
    sweep_stale_pid(paths);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_expected_temp_file_shapes() {
        assert!(TEMP_FILE_PATTERN.is_match("a1b2c3"));
        assert!(TEMP_FILE_PATTERN.is_match("a1b2c3.auth"));
        assert!(TEMP_FILE_PATTERN.is_match("a1b2c3-up.sh"));
        assert!(TEMP_FILE_PATTERN.is_match("a1b2c3-down.sh"));
        assert!(TEMP_FILE_PATTERN.is_match("a1b2c3-block.sh"));
        assert!(!TEMP_FILE_PATTERN.is_match("../etc/passwd"));
        assert!(!TEMP_FILE_PATTERN.is_match("a1b2c3.bak"));
    }

    #[test]
    fn sweep_removes_unclaimed_matches_and_keeps_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        let temp_dir = paths.ensure_temp_dir().unwrap();

        let orphan = temp_dir.join("deadbeef.auth");
        let claimed_file = temp_dir.join("cafef00d.auth");
        let unrelated = temp_dir.join("not-a-temp-file.bak");

        fs::write(&orphan, b"x").unwrap();
        fs::write(&claimed_file, b"x").unwrap();
        fs::write(&unrelated, b"x").unwrap();

        let mut claimed = HashSet::new();
        claimed.insert(claimed_file.clone());

        sweep_temp_files(&paths, &claimed);

        assert!(!orphan.exists());
        assert!(claimed_file.exists());
        assert!(unrelated.exists());
    }
}
