//! The profile supervisor: per-profile subprocess lifecycle,
//! output parsing into state transitions, and guaranteed cleanup.

pub mod command;
pub mod parse;
pub mod process;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::randgen;
use crate::spawn_guard;
use ovpn_helper_types::{EventType, OutputData, Profile, Status, Token};
use parking_lot::{Mutex, RwLock};
use parse::ParsedLine;
use process::{ProcessBuilder, ProcessHandle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(windows)]
use crate::tap::{self, TapAdapter};

pub type EmitFn = Arc<dyn Fn(EventType, serde_json::Value) + Send + Sync>;

const STOP_ESCALATION: Duration = Duration::from_secs(5);
const TIMEOUT_WATCHDOG: Duration = Duration::from_secs(60);
const TIMEOUT_ESCALATION: Duration = Duration::from_secs(3);
const AUTH_ERROR_DEBOUNCE: Duration = Duration::from_secs(10);
const MIN_VISIBLE_DURATION: Duration = Duration::from_secs(1);
const WAIT_GRACE: Duration = Duration::from_millis(50);

/// Configuration shared by every profile the registry supervises.
pub struct SupervisorConfig {
    pub paths: Paths,
    pub openvpn_bin: PathBuf,
    pub openvpn_dir: PathBuf,
}

struct ProfileHandle {
    public: Mutex<Profile>,
    state: AtomicBool,
    stop: AtomicBool,
    waiters: Mutex<Vec<mpsc::Sender<()>>>,
    rem_paths: Mutex<Vec<PathBuf>>,
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
    #[cfg(windows)]
    tap: Mutex<Option<TapAdapter>>,
    last_auth_err: Mutex<Option<Instant>>,
    token: Mutex<Token>,
}

impl ProfileHandle {
    fn new(profile: Profile) -> Arc<Self> {
        Arc::new(ProfileHandle {
            public: Mutex::new(profile),
            state: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            waiters: Mutex::new(Vec::new()),
            rem_paths: Mutex::new(Vec::new()),
            process: Mutex::new(None),
            #[cfg(windows)]
            tap: Mutex::new(None),
            last_auth_err: Mutex::new(None),
            token: Mutex::new(Token::default()),
        })
    }
}

/// The process-wide profile registry: the only owner of per-profile
/// mutable state, held behind an injected struct rather than module
/// statics so it can be constructed per-test.
pub struct Registry {
    profiles: RwLock<HashMap<String, Arc<ProfileHandle>>>,
    builder: Arc<dyn ProcessBuilder>,
    config: SupervisorConfig,
    emit: EmitFn,
    self_weak: Weak<Registry>,
}

impl Registry {
    pub fn new(builder: Arc<dyn ProcessBuilder>, config: SupervisorConfig, emit: EmitFn) -> Arc<Self> {
        Arc::new_cyclic(|weak| Registry {
            profiles: RwLock::new(HashMap::new()),
            builder,
            config,
            emit,
            self_weak: weak.clone(),
        })
    }

    /// An owned handle to this registry, for spawning tasks that need to
    /// keep it alive past the current call.
    fn arc(&self) -> Arc<Registry> {
        self.self_weak
            .upgrade()
            .expect("registry outlives every task spawned from it")
    }

    /// Public snapshot of every registered profile.
    pub fn list_profiles(&self) -> Vec<Profile> {
        self.profiles
            .read()
            .values()
            .map(|h| h.public.lock().clone())
            .collect()
    }

    /// `true` iff any profile is currently connected.
    pub fn any_connected(&self) -> bool {
        self.profiles
            .read()
            .values()
            .any(|h| h.public.lock().status == Status::Connected)
    }

    /// Every temp-file path currently claimed by a registered profile, for
    /// the autoclean sweep to treat as not orphaned.
    pub fn claimed_temp_files(&self) -> std::collections::HashSet<PathBuf> {
        self.profiles
            .read()
            .values()
            .flat_map(|h| h.rem_paths.lock().clone())
            .collect()
    }

    fn emit_update(&self, handle: &ProfileHandle) {
        let snapshot = handle.public.lock().clone();
        let value = serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null);
        (self.emit)(EventType::Update, value);
    }

    fn emit_output(&self, id: &str, line: &str) {
        let payload = OutputData {
            id: id.to_owned(),
            output: line.to_owned(),
        };
        (self.emit)(
            EventType::Output,
            serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
        );
    }

    /// `Start(timeout)`: registers the profile and launches OpenVPN for
    /// it. A no-op, successful return if the id is already registered.
    pub fn start(&self, profile: Profile, timeout: bool) -> Result<()> {
        let id = profile.id.clone();

        {
            let mut profiles = self.profiles.write();
            if profiles.contains_key(&id) {
                return Ok(());
            }
            let mut initial = profile.clone();
            initial.status = Status::Connecting;
            let handle = ProfileHandle::new(initial);
            profiles.insert(id.clone(), handle);
        }

        if let Err(err) = self.start_inner(&id, &profile, timeout) {
            self.clear_status(&id, Instant::now());
            return Err(err);
        }

        Ok(())
    }

    fn start_inner(&self, id: &str, profile: &Profile, timeout: bool) -> Result<()> {
        let handle = self.handle(id).expect("just inserted");
        self.emit_update(&handle);

        let mut token = handle.token.lock();
        token.profile_id = id.to_owned();
        if let Some(pem) = &profile.server_public_key {
            token.server_public_key_fingerprint = fingerprint(pem);
        }
        if token.token.is_empty() {
            token.update(randgen::rand_str(32)?);
        }
        let token_value = token.token.clone();
        drop(token);

        let materialized = command::materialize(profile, &self.config.paths, &token_value)?;
        *handle.rem_paths.lock() = materialized.rem_paths.clone();

        #[cfg(windows)]
        let tap_name = {
            let tap = tap::acquire_tap()?;
            let name = tap.name.clone();
            *handle.tap.lock() = Some(tap);
            Some(name)
        };
        #[cfg(not(windows))]
        let tap_name: Option<String> = None;

        let cmd = command::build_command(
            &self.config.openvpn_bin,
            &self.config.openvpn_dir,
            &materialized,
            tap_name.as_deref(),
        );

        let mut process = self.builder.start(cmd).map_err(Error::Spawn)?;

        let (tx, rx) = mpsc::sync_channel::<String>(100);
        let drain_handle = process.drain_into(tx);
        *handle.process.lock() = Some(process);

        let registry = self.arc();
        let id_owned = id.to_owned();
        let start_time = Instant::now();
        thread::spawn(move || registry.consume_output(&id_owned, rx));

        let registry = self.arc();
        let id_owned = id.to_owned();
        thread::spawn(move || registry.reap(&id_owned, start_time, drain_handle));

        if timeout {
            let registry = self.arc();
            let id_owned = id.to_owned();
            spawn_guard_sync("start-timeout-watchdog", move || {
                registry.timeout_watchdog(&id_owned)
            });
        }

        Ok(())
    }

    fn timeout_watchdog(&self, id: &str) {
        thread::sleep(TIMEOUT_WATCHDOG);
        let handle = match self.handle(id) {
            Some(h) => h,
            None => return,
        };
        if handle.public.lock().status == Status::Connected {
            return;
        }
        if let Some(process) = handle.process.lock().as_ref() {
            let _ = process.interrupt();
        }
        thread::sleep(TIMEOUT_ESCALATION);
        if let Some(process) = handle.process.lock().as_ref() {
            let _ = process.kill();
        }
        (self.emit)(EventType::TimeoutError, serde_json::Value::Null);
    }

    fn consume_output(&self, id: &str, rx: mpsc::Receiver<String>) {
        let handle = match self.handle(id) {
            Some(h) => h,
            None => return,
        };

        for line in rx.iter() {
            self.emit_output(id, &line);

            match parse::classify(&line) {
                ParsedLine::InitComplete => {
                    let mut p = handle.public.lock();
                    p.status = Status::Connected;
                    p.timestamp = chrono::Utc::now().timestamp() - 5;
                    drop(p);
                    handle.token.lock().valid = true;
                    self.emit_update(&handle);
                    (self.emit)(EventType::Connected, serde_json::Value::Null);
                    crate::network::flush_dns_cache_async();
                }
                ParsedLine::InactiveTimeout => {
                    (self.emit)(EventType::Inactive, serde_json::Value::Null);
                    handle.stop.store(true, Ordering::SeqCst);
                }
                ParsedLine::InactivityTimeoutOther => {
                    self.spawn_reconnect(id);
                }
                ParsedLine::AssignAddressFailed => {
                    let registry = self.arc();
                    let id_owned = id.to_owned();
                    spawn_guard_sync("assign-address-restart", move || {
                        thread::sleep(Duration::from_secs(3));
                        if let Some(h) = registry.handle(&id_owned) {
                            if !h.stop.load(Ordering::SeqCst) {
                                registry.restart_profiles(true);
                            }
                        }
                    });
                }
                ParsedLine::AuthFailed => {
                    handle.stop.store(true, Ordering::SeqCst);
                    handle.token.lock().init();
                    let mut last = handle.last_auth_err.lock();
                    let now = Instant::now();
                    let should_emit = last.map(|t| now.duration_since(t) >= AUTH_ERROR_DEBOUNCE).unwrap_or(true);
                    if should_emit {
                        *last = Some(now);
                        drop(last);
                        (self.emit)(EventType::AuthError, serde_json::Value::Null);
                    }
                }
                ParsedLine::ServerAddr(addr) => {
                    handle.public.lock().server_addr = addr;
                    self.emit_update(&handle);
                }
                ParsedLine::ClientAddr(addr) => {
                    handle.public.lock().client_addr = addr;
                    self.emit_update(&handle);
                }
                ParsedLine::None => {}
            }
        }
    }

    fn spawn_reconnect(&self, id: &str) {
        let registry = self.arc();
        let id_owned = id.to_owned();
        spawn_guard_sync("inactivity-reconnect", move || {
            if let Some(copy) = registry.copy_profile(&id_owned) {
                let _ = registry.stop(&id_owned);
                registry.wait(&id_owned);
                if copy.reconnect {
                    let _ = registry.start(copy, false);
                }
            }
        });
    }

    fn reap(&self, id: &str, start: Instant, drain_handle: thread::JoinHandle<()>) {
        let handle = match self.handle(id) {
            Some(h) => h,
            None => return,
        };

        if let Some(process) = handle.process.lock().as_ref() {
            let _ = process.wait();
        }
        let _ = drain_handle.join();

        #[cfg(target_os = "macos")]
        {
            if let Ok(svc) = crate::scutil::get_primary_service() {
                let _ = crate::scutil::restore_dns(&svc);
            }
        }

        if !handle.stop.load(Ordering::SeqCst) {
            log::warn!("profile '{}' exited unexpectedly", id);
        }

        self.clear_status(id, start);
    }

    /// The single cleanup path ("clearStatus").
    fn clear_status(&self, id: &str, start: Instant) {
        let handle = match self.handle(id) {
            Some(h) => h,
            None => return,
        };

        #[cfg(windows)]
        {
            if let Some(t) = handle.tap.lock().take() {
                tap::release_tap(&t);
            }
        }

        let elapsed = start.elapsed();
        if elapsed < MIN_VISIBLE_DURATION {
            thread::sleep(MIN_VISIBLE_DURATION - elapsed);
        }

        {
            let mut p = handle.public.lock();
            p.status = Status::Disconnected;
            p.timestamp = 0;
            p.client_addr.clear();
            p.server_addr.clear();
        }
        self.emit_update(&handle);
        (self.emit)(EventType::Disconnected, serde_json::Value::Null);

        for path in handle.rem_paths.lock().drain(..) {
            let _ = std::fs::remove_file(path);
        }

        let became_empty = {
            let mut profiles = self.profiles.write();
            profiles.remove(id);
            profiles.is_empty()
        };

        #[cfg(target_os = "macos")]
        {
            if became_empty {
                let _ = crate::scutil::clear_pritunl_keys();
            }
        }
        #[cfg(not(target_os = "macos"))]
        let _ = became_empty;

        handle.state.store(false, Ordering::SeqCst);
        for waiter in handle.waiters.lock().drain(..) {
            let _ = waiter.send(());
        }
    }

    /// `Stop()`: idempotent; signals the child and blocks until reaped.
    pub fn stop(&self, id: &str) -> Result<()> {
        let handle = match self.handle(id) {
            Some(h) => h,
            None => return Ok(()),
        };

        if handle.process.lock().is_none() {
            return Ok(());
        }

        handle.stop.store(true, Ordering::SeqCst);
        handle.public.lock().status = Status::Disconnecting;
        self.emit_update(&handle);

        if let Some(process) = handle.process.lock().as_ref() {
            let _ = process.interrupt();
        }

        let registry = self.arc();
        let id_owned = id.to_owned();
        spawn_guard_sync("stop-escalation", move || {
            thread::sleep(STOP_ESCALATION);
            if let Some(h) = registry.handle(&id_owned) {
                if h.state.load(Ordering::SeqCst) {
                    if let Some(process) = h.process.lock().as_ref() {
                        let _ = process.kill();
                    }
                }
            }
        });

        self.wait(id);
        Ok(())
    }

    /// `Wait()`: blocks until the profile transitions to `state=false`.
    pub fn wait(&self, id: &str) {
        let handle = match self.handle(id) {
            Some(h) => h,
            None => return,
        };

        let (tx, rx) = mpsc::channel();
        {
            if !handle.state.load(Ordering::SeqCst) {
                return;
            }
            handle.waiters.lock().push(tx);
        }
        let _ = rx.recv();
        thread::sleep(WAIT_GRACE);
    }

    /// `Copy()`: a fresh profile carrying the same five user-supplied
    /// inputs, ready to be re-`start`ed.
    pub fn copy_profile(&self, id: &str) -> Option<Profile> {
        self.handle(id).map(|h| h.public.lock().copy_inputs())
    }

    /// Restarts every registered profile with `reconnect=true`.
    /// `timeout` is threaded through to the resulting `Start` calls.
    pub fn restart_profiles(&self, timeout: bool) {
        let ids: Vec<String> = self.profiles.read().keys().cloned().collect();
        for id in ids {
            let copy = match self.copy_profile(&id) {
                Some(c) => c,
                None => continue,
            };
            if !copy.reconnect {
                continue;
            }
            let _ = self.stop(&id);
            self.wait(&id);
            let _ = self.start(copy, timeout);
        }
    }

    fn handle(&self, id: &str) -> Option<Arc<ProfileHandle>> {
        self.profiles.read().get(id).cloned()
    }

    /// `PUT /token`: forces a fresh token value for a registered profile.
    pub fn refresh_token(&self, id: &str) -> Result<()> {
        let handle = match self.handle(id) {
            Some(h) => h,
            None => return Ok(()),
        };
        let fresh = randgen::rand_str(32)?;
        handle.token.lock().update(fresh);
        Ok(())
    }

    /// `DELETE /token`: invalidates a registered profile's token, the same
    /// way an `AUTH_FAILED` line would.
    pub fn invalidate_token(&self, id: &str) {
        if let Some(handle) = self.handle(id) {
            handle.token.lock().init();
        }
    }
}

fn fingerprint(pem: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(pem.as_bytes());
    hex::encode(hasher.finalize())
}

/// Runs `f` on a detached thread, logging (not propagating) any panic.
fn spawn_guard_sync<F>(label: &'static str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            log::error!("background task '{}' panicked: {}", label, msg);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::process::{Command as StdCommand, ExitStatus};
    use std::sync::atomic::AtomicUsize;

    struct FakeProcessHandle;

    impl ProcessHandle for FakeProcessHandle {
        fn drain_into(&mut self, _tx: mpsc::SyncSender<String>) -> thread::JoinHandle<()> {
            thread::spawn(|| {})
        }

        fn interrupt(&self) -> io::Result<()> {
            Ok(())
        }

        fn kill(&self) -> io::Result<()> {
            Ok(())
        }

        fn wait(&self) -> io::Result<ExitStatus> {
            if cfg!(windows) {
                StdCommand::new("cmd").args(&["/C", "exit 0"]).status()
            } else {
                StdCommand::new("true").status()
            }
        }
    }

    struct FakeProcessBuilder {
        starts: Arc<AtomicUsize>,
    }

    impl ProcessBuilder for FakeProcessBuilder {
        fn start(&self, _cmd: std::process::Command) -> io::Result<Box<dyn ProcessHandle>> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeProcessHandle))
        }
    }

    fn make_profile(id: &str, username: Option<&str>, password: Option<&str>) -> Profile {
        Profile {
            id: id.to_owned(),
            data: "client\n".to_owned(),
            username: username.map(|s| s.to_owned()),
            password: password.map(|s| s.to_owned()),
            server_public_key: None,
            reconnect: false,
            status: Status::Disconnected,
            timestamp: 0,
            server_addr: String::new(),
            client_addr: String::new(),
        }
    }

    fn test_registry(starts: Arc<AtomicUsize>) -> (Arc<Registry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig {
            paths: Paths::dev(&dir.path().join("exe")),
            openvpn_bin: PathBuf::from("openvpn"),
            openvpn_dir: dir.path().to_path_buf(),
        };
        let builder: Arc<dyn ProcessBuilder> = Arc::new(FakeProcessBuilder { starts });
        let emit: EmitFn = Arc::new(|_, _| {});
        (Registry::new(builder, config, emit), dir)
    }

    #[test]
    fn double_start_with_same_id_is_a_safe_no_op() {
        let starts = Arc::new(AtomicUsize::new(0));
        let (registry, _dir) = test_registry(starts.clone());
        let profile = make_profile("dup", Some("alice"), Some("hunter2"));

        registry.start(profile.clone(), false).unwrap();
        registry.start(profile, false).unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn username_only_profile_does_not_materialize_an_auth_file() {
        let starts = Arc::new(AtomicUsize::new(0));
        let (registry, _dir) = test_registry(starts);
        let profile = make_profile("userOnly", Some("alice"), None);

        registry.start(profile, false).unwrap();

        let claimed = registry.claimed_temp_files();
        assert!(!claimed
            .iter()
            .any(|p| p.extension().map(|e| e == "auth").unwrap_or(false)));
    }

    #[test]
    fn username_and_password_materializes_an_auth_file() {
        let starts = Arc::new(AtomicUsize::new(0));
        let (registry, _dir) = test_registry(starts);
        let profile = make_profile("userpass", Some("alice"), Some("hunter2"));

        registry.start(profile, false).unwrap();

        let claimed = registry.claimed_temp_files();
        assert!(claimed
            .iter()
            .any(|p| p.extension().map(|e| e == "auth").unwrap_or(false)));
    }
}
