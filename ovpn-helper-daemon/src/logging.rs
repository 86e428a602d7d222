//! Log rotation and `fern` setup.
//!
//! Mirrors the original's "one previous log kept" rotation: on startup the
//! current log file is renamed to `<name>.1`, overwriting whatever was
//! there, and a fresh file is opened for the new run.

use ovpn_helper_core::paths::Paths;
use std::fs;
use std::io;

const ROTATE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Renames `log_path` to `log_path_1` if it exists and exceeds 10MiB,
/// clobbering any previous `.1` file. Not an error if there is no current
/// log yet, or if it's still under the threshold.
fn rotate(paths: &Paths) -> io::Result<()> {
    let current = paths.log_path();
    let metadata = match fs::metadata(&current) {
        Ok(m) => m,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if metadata.len() > ROTATE_THRESHOLD_BYTES {
        fs::rename(&current, paths.log_path_1())?;
    }
    Ok(())
}

/// Sets up logging to both stderr (colored) and the rotated log file, at
/// a level derived from `-v` repeat count (0 = info, 1 = debug, 2+ = trace),
/// and installs `log_panics` so a panicking thread logs instead of only
/// printing to stderr.
pub fn init(paths: &Paths, verbosity: u64, dev: bool) -> Result<(), fern::InitError> {
    paths.ensure_log_parent()?;
    if let Err(err) = rotate(paths) {
        eprintln!("warning: failed to rotate log file: {}", err);
    }

    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(fern::log_file(paths.log_path())?);

    // Production runs as a detached service with no attached console;
    // only `--dev` runs get a stderr dispatch.
    let mut dispatch = fern::Dispatch::new().chain(file);
    if dev {
        let colors = fern::colors::ColoredLevelConfig::new()
            .info(fern::colors::Color::Green)
            .warn(fern::colors::Color::Yellow)
            .error(fern::colors::Color::Red);

        let console = fern::Dispatch::new()
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "[{}][{}] {}",
                    record.target(),
                    colors.color(record.level()),
                    message
                ))
            })
            .level(level)
            .chain(std::io::stderr());

        dispatch = dispatch.chain(console);
    }

    dispatch.apply()?;
    log_panics::init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovpn_helper_core::paths::Paths;

    #[test]
    fn rotate_is_a_noop_when_no_log_exists() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        rotate(&paths).unwrap();
        assert!(!paths.log_path_1().exists());
    }

    #[test]
    fn rotate_leaves_small_logs_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        paths.ensure_log_parent().unwrap();
        fs::write(paths.log_path(), b"small").unwrap();

        rotate(&paths).unwrap();

        assert!(paths.log_path().exists());
        assert!(!paths.log_path_1().exists());
    }

    #[test]
    fn rotate_renames_oversized_logs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::dev(&dir.path().join("exe"));
        paths.ensure_log_parent().unwrap();
        let oversized = vec![0u8; (ROTATE_THRESHOLD_BYTES + 1) as usize];
        fs::write(paths.log_path(), &oversized).unwrap();

        rotate(&paths).unwrap();

        assert!(!paths.log_path().exists());
        assert!(paths.log_path_1().exists());
    }
}
