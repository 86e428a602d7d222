//! Entry point: argument parsing, startup bootstrap, and the two runtimes
//! (the supervisor's watchers on a dedicated tokio 0.2 thread, the control
//! API on the main tokio 1.x runtime).

mod api;
mod autoclean;
mod daemon;
mod logging;

use clap::{App, Arg};
use daemon::Daemon;
use ovpn_helper_core::paths::Paths;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_API_ADDR: &str = "127.0.0.1:9780";

fn default_openvpn_bin() -> PathBuf {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            PathBuf::from(r"C:\Program Files\OpenVPN\bin\openvpn.exe")
        } else if #[cfg(target_os = "macos")] {
            PathBuf::from("/Applications/Pritunl.app/Contents/Resources/openvpn")
        } else {
            PathBuf::from("/usr/sbin/openvpn")
        }
    }
}

fn default_openvpn_dir() -> PathBuf {
    default_openvpn_bin()
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolves the directory the running executable lives in, for `--dev` mode.
fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Waits for a termination request: SIGTERM or SIGINT on unix, Ctrl-C on
/// Windows.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => log::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => log::info!("received SIGINT, shutting down"),
    }
}

#[cfg(windows)]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("received ctrl-c, shutting down");
}

fn main() {
    let matches = App::new("ovpn-helper-daemon")
        .about("Local control-plane daemon that supervises OpenVPN client profiles")
        .arg(
            Arg::with_name("dev")
                .long("dev")
                .help("Run with all paths collapsed under <exe_dir>/../dev"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increase log verbosity (repeatable)"),
        )
        .arg(
            Arg::with_name("api-addr")
                .long("api-addr")
                .takes_value(true)
                .help("Loopback address the control API binds to"),
        )
        .get_matches();

    let dev = matches.is_present("dev");
    let verbosity = matches.occurrences_of("verbose");
    let api_addr: SocketAddr = matches
        .value_of("api-addr")
        .unwrap_or(DEFAULT_API_ADDR)
        .parse()
        .expect("invalid --api-addr");

    let paths = if dev {
        Paths::dev(&exe_dir())
    } else {
        Paths::production()
    };

    if let Err(err) = logging::init(&paths, verbosity, dev) {
        eprintln!("failed to initialize logging: {}", err);
        std::process::exit(1);
    }

    #[cfg(not(windows))]
    if let Err(err) = ovpn_helper_core::pid::pid_init(&paths.pid_path()) {
        log::error!("failed to initialize PID file: {}", err);
        std::process::exit(1);
    }

    let auth_key = match api::auth::bootstrap(&paths) {
        Ok(key) => key,
        Err(err) => {
            log::error!("failed to bootstrap auth key: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = paths.ensure_temp_dir() {
        log::warn!("failed to create temp dir: {}", err);
    }

    let daemon = Daemon::new(paths, default_openvpn_bin(), default_openvpn_dir(), auth_key);

    daemon.autoclean();

    let watcher_daemon = daemon.clone();
    std::thread::Builder::new()
        .name("watchers".into())
        .spawn(move || watcher_daemon.run_watchers())
        .expect("failed to spawn watcher thread");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build control API runtime");

    rt.block_on(async move {
        log::info!("control API listening on {}", api_addr);
        daemon.serve(api_addr, shutdown_signal()).await;
    });

    log::info!("shutdown complete");
}
