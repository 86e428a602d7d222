//! Background-task panic containment.
//!
//! A panic inside a watcher or output-drain task must not bring the
//! daemon down. Tokio already catches a panic while polling a spawned
//! task and turns it into a `JoinError` rather than aborting the process;
//! this helper just makes sure every background task has something
//! awaiting its handle so the panic gets logged with context instead of
//! vanishing silently when nobody joins it.

use std::future::Future;

/// Spawns `fut` as a supervised background task: any panic inside it is
/// caught by the runtime and logged under `label` instead of propagating.
pub fn spawn_guarded<F>(label: &'static str, fut: F) -> tokio02::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio02::spawn(async move {
        let handle = tokio02::spawn(fut);
        if let Err(join_err) = handle.await {
            log::error!("background task '{}' terminated abnormally: {}", label, join_err);
        }
    })
}
