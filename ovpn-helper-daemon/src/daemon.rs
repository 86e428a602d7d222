//! Wires the registry, event bus, watchers, and HTTP server together.

use crate::api;
use crate::api::auth::AuthState;
use crate::autoclean;
use ovpn_helper_core::paths::Paths;
use ovpn_helper_core::supervisor::{EmitFn, Registry, SupervisorConfig};
use ovpn_helper_core::supervisor::process::RealProcessBuilder;
use ovpn_helper_core::watch::{self, WakeState};
use ovpn_helper_types::{Event, EventType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const LISTENER_CHANNEL_CAPACITY: usize = 64;
const WAKEUP_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Fans published events out to every subscribed SSE client. Publication
/// never blocks: a full or disconnected listener channel is dropped
/// silently rather than backpressuring the caller.
pub struct EventBus {
    listeners: RwLock<HashMap<Uuid, tokio::sync::mpsc::Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(EventBus {
            listeners: RwLock::new(HashMap::new()),
        })
    }

    pub fn publish(&self, event_type: EventType, data: serde_json::Value) {
        let event = Event::new(event_type, data);
        for sender in self.listeners.read().values() {
            let _ = sender.try_send(event.clone());
        }
    }

    pub fn subscribe(&self) -> (Uuid, tokio::sync::mpsc::Receiver<Event>) {
        let (tx, rx) = tokio::sync::mpsc::channel(LISTENER_CHANNEL_CAPACITY);
        let id = Uuid::new_v4();
        self.listeners.write().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.listeners.write().remove(&id);
    }
}

/// Module-scope-equivalent timestamps, touched by `/ping` and `/wakeup`
/// and read by the wake watcher and the `/wakeup` poll.
pub struct Clocks {
    pub last_awake: RwLock<Instant>,
    pub ping: RwLock<Instant>,
}

impl Clocks {
    fn new() -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Clocks {
            last_awake: RwLock::new(now),
            ping: RwLock::new(now),
        })
    }
}

pub struct Daemon {
    pub registry: Arc<Registry>,
    pub events: Arc<EventBus>,
    pub clocks: Arc<Clocks>,
    pub auth: Arc<AuthState>,
    pub paths: Paths,
}

impl Daemon {
    pub fn new(paths: Paths, openvpn_bin: PathBuf, openvpn_dir: PathBuf, auth_key: String) -> Arc<Self> {
        let events = EventBus::new();
        let clocks = Clocks::new();

        let emit_events = events.clone();
        let emit: EmitFn = Arc::new(move |event_type, data| emit_events.publish(event_type, data));

        let config = SupervisorConfig {
            paths: paths.clone(),
            openvpn_bin,
            openvpn_dir,
        };
        let registry = Registry::new(Arc::new(RealProcessBuilder), config, emit);

        Arc::new(Daemon {
            registry,
            events,
            clocks,
            auth: Arc::new(AuthState { key: auth_key }),
            paths,
        })
    }

    /// Autoclean sweep: scan for orphaned temp files and a stale PID.
    pub fn autoclean(&self) {
        let claimed = self.registry.claimed_temp_files();
        autoclean::run(&self.paths, &claimed);
    }

    /// Marks the daemon awake, for the wake-detector's `/wakeup` poll and
    /// for `/ping`'s liveness bookkeeping.
    pub fn touch_awake(&self) {
        *self.clocks.last_awake.write() = Instant::now();
    }

    pub fn touch_ping(&self) {
        *self.clocks.ping.write() = Instant::now();
    }

    /// `POST /wakeup`: publishes the event, then polls `last_awake` for up
    /// to 250ms, returning whether it was touched after the call started.
    pub async fn wakeup_and_poll(&self) -> bool {
        let before = Instant::now();
        self.events.publish(EventType::Wakeup, serde_json::Value::Null);

        let deadline = Instant::now() + WAKEUP_POLL_TIMEOUT;
        loop {
            if *self.clocks.last_awake.read() >= before {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Spawns the two wake watchers (10ms/100ms tick) plus, on macOS, the
    /// DNS reconciliation watcher, onto a dedicated tokio 0.2 runtime the
    /// supervisor's watchers were written against. Blocks the calling
    /// thread forever; intended to run on its own OS thread.
    pub fn run_watchers(self: Arc<Self>) {
        let mut rt = tokio02::runtime::Builder::new()
            .threaded_scheduler()
            .enable_all()
            .build()
            .expect("failed to build watcher runtime");

        rt.block_on(async move {
            let wake_state = WakeState::new();
            watch::spawn_wake_watcher("wake-watcher-10ms", Duration::from_millis(10), self.registry.clone(), wake_state.clone());
            watch::spawn_wake_watcher("wake-watcher-100ms", Duration::from_millis(100), self.registry.clone(), wake_state);

            #[cfg(target_os = "macos")]
            watch::spawn_dns_watcher(self.registry.clone());

            std::future::pending::<()>().await;
        });
    }

    /// Serves the control API until `shutdown` resolves, then runs the
    /// shutdown sequence: force-close, 250ms settle, stop every profile,
    /// 750ms drain.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr, shutdown: impl std::future::Future<Output = ()>) {
        let app = api::router(self.clone());
        let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind control API listener");

        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown.await;
        });

        if let Err(err) = tokio::time::timeout(Duration::from_secs(1), server).await {
            log::warn!("control API did not shut down within 1s, forcing close: {:?}", err);
        }

        tokio::time::sleep(Duration::from_millis(250)).await;

        let ids: Vec<String> = self.registry.list_profiles().into_iter().map(|p| p.id).collect();
        let registry = self.registry.clone();
        let _ = tokio::task::spawn_blocking(move || {
            for id in ids {
                let _ = registry.stop(&id);
            }
        })
        .await;

        tokio::time::sleep(Duration::from_millis(750)).await;
    }
}
