//! Sleep/wake detection and (macOS only) DNS reconciliation.
//!
//! Both watchers are plain loops spawned twice over (the wake watcher at
//! two different tick resolutions) rather than driven by a platform sleep
//! notification API, so they work identically across every supported OS.

use crate::spawn_guard;
use crate::supervisor::Registry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SLEEP_THRESHOLD: Duration = Duration::from_secs(10);
const WAKE_DEBOUNCE: Duration = Duration::from_secs(5);
const RESTART_DEBOUNCE: Duration = Duration::from_secs(60);

/// Debounce state shared by both wake-watcher instances.
pub struct WakeState {
    wake: Mutex<Instant>,
    last_restart: Mutex<Instant>,
}

impl WakeState {
    pub fn new() -> Arc<Self> {
        let now = Instant::now();
        Arc::new(WakeState {
            wake: Mutex::new(now),
            last_restart: Mutex::new(now),
        })
    }

    /// Called whenever a watcher observes the monotonic clock having
    /// skipped forward by more than `SLEEP_THRESHOLD`.
    fn on_wake(&self, registry: &Registry) {
        let advanced = {
            let mut wake = self.wake.lock();
            let now = Instant::now();
            if now.duration_since(*wake) >= WAKE_DEBOUNCE {
                *wake = now;
                true
            } else {
                false
            }
        };
        if !advanced {
            return;
        }

        let should_restart = {
            let mut last_restart = self.last_restart.lock();
            let now = Instant::now();
            if now.duration_since(*last_restart) >= RESTART_DEBOUNCE {
                *last_restart = now;
                true
            } else {
                false
            }
        };
        if should_restart {
            registry.restart_profiles(false);
        }
    }
}

/// Spawns one wake watcher at the given tick resolution. Two instances
/// (10ms and 100ms) are run side by side; a single one would suffice
/// functionally, but both are kept to preserve wake sensitivity across
/// the range of scheduler granularities observed in the wild.
pub fn spawn_wake_watcher(
    label: &'static str,
    tick: Duration,
    registry: Arc<Registry>,
    state: Arc<WakeState>,
) -> tokio02::task::JoinHandle<()> {
    spawn_guard::spawn_guarded(label, async move {
        let mut cur_time = Instant::now();
        loop {
            tokio02::time::delay_for(tick + Duration::from_secs(1)).await;
            let now = Instant::now();
            if now.duration_since(cur_time) > SLEEP_THRESHOLD {
                state.on_wake(&registry);
            }
            cur_time = now;
        }
    })
}

#[cfg(target_os = "macos")]
mod dns_watcher {
    use super::*;
    use crate::scutil;

    const TICK: Duration = Duration::from_secs(1);
    const MISMATCH_DEBOUNCE: u32 = 2;

    /// Tracks whether the global Pritunl DNS key has been observed present
    /// on a connected tick (so a later all-profiles-disconnected tick knows
    /// to restore it) and how many consecutive cycles have seen a
    /// domains/servers mismatch.
    struct DnsWatchState {
        backed_up: bool,
        mismatch_streak: u32,
    }

    pub fn spawn(registry: Arc<Registry>) -> tokio02::task::JoinHandle<()> {
        spawn_guard::spawn_guarded("dns-watcher", async move {
            let mut state = DnsWatchState {
                backed_up: false,
                mismatch_streak: 0,
            };
            loop {
                tokio02::time::delay_for(TICK).await;
                tick(&registry, &mut state);
            }
        })
    }

    fn tick(registry: &Registry, state: &mut DnsWatchState) {
        if !registry.any_connected() {
            if state.backed_up {
                if let Ok(svc) = scutil::get_primary_service() {
                    if let Err(err) = scutil::restore_dns(&svc) {
                        log::warn!("failed to restore DNS on disconnect: {}", err);
                    }
                }
                state.backed_up = false;
            }
            state.mismatch_streak = 0;
            return;
        }

        let global = match scutil::get_key("State", "/Network/Global/DNS") {
            Ok(Some(blob)) => {
                state.backed_up = true;
                blob
            }
            Ok(None) => {
                state.mismatch_streak = 0;
                return;
            }
            Err(err) => {
                log::warn!("failed to read global DNS state: {}", err);
                state.mismatch_streak = 0;
                return;
            }
        };

        let pritunl = match scutil::get_key("State", "/Network/Pritunl/DNS") {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                if let Ok(ids) = scutil::connection_ids() {
                    if let Some(id) = ids.first() {
                        let src_key = format!("/Network/Pritunl/Connection/{}", id);
                        let _ = scutil::copy_key("State", &src_key, "State", "/Network/Pritunl/DNS");
                    }
                }
                state.mismatch_streak = 0;
                return;
            }
            Err(err) => {
                log::warn!("failed to read pritunl DNS state: {}", err);
                state.mismatch_streak = 0;
                return;
            }
        };

        let (global_domains, global_servers) = scutil::parse_dns(&global);
        let (pritunl_domains, pritunl_servers) = scutil::parse_dns(&pritunl);

        if global_domains == pritunl_domains && global_servers == pritunl_servers {
            state.mismatch_streak = 0;
            return;
        }

        state.mismatch_streak += 1;
        if state.mismatch_streak < MISMATCH_DEBOUNCE {
            return;
        }
        state.mismatch_streak = 0;

        match scutil::get_primary_service() {
            Ok(svc) => {
                if let Err(err) = scutil::backup_dns(&svc) {
                    log::warn!("failed to back up DNS before reconciliation: {}", err);
                    return;
                }
                if let Err(err) = scutil::copy_dns("/Network/Pritunl/DNS") {
                    log::warn!("failed to copy reconciled DNS: {}", err);
                }
            }
            Err(err) => log::warn!("failed to determine primary service for DNS reconciliation: {}", err),
        }
    }
}

#[cfg(target_os = "macos")]
pub fn spawn_dns_watcher(registry: Arc<Registry>) -> tokio02::task::JoinHandle<()> {
    dns_watcher::spawn(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_debounce_requires_five_seconds_between_advances() {
        let state = WakeState::new();
        let now = Instant::now();
        *state.wake.lock() = now;
        // Immediately re-checking should not advance `wake`.
        let advanced = {
            let mut wake = state.wake.lock();
            if now.duration_since(*wake) >= WAKE_DEBOUNCE {
                *wake = now;
                true
            } else {
                false
            }
        };
        assert!(!advanced);
    }

    #[test]
    fn restart_debounce_requires_sixty_seconds() {
        let state = WakeState::new();
        let long_ago = Instant::now() - Duration::from_secs(120);
        *state.last_restart.lock() = long_ago;
        let should_restart = {
            let mut last_restart = state.last_restart.lock();
            let now = Instant::now();
            if now.duration_since(*last_restart) >= RESTART_DEBOUNCE {
                *last_restart = now;
                true
            } else {
                false
            }
        };
        assert!(should_restart);
    }
}
