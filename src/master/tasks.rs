//! Background loops of a master: leader monitor, worker sweep and sync retry

use crate::common::periodic::spawn_periodic;
use crate::master::state::MasterState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

/// Start every periodic task of a master.
pub fn start_background_tasks(
    state: &MasterState,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let config = &state.config;

    let monitor = {
        let state = state.clone();
        spawn_periodic(
            "leader-monitor",
            config.leader_check_interval(),
            true,
            shutdown.clone(),
            move || {
                let state = state.clone();
                async move {
                    let before = state.elector.view();
                    state.elector.check_leader().await;
                    state.resync_after_change(&before).await;
                }
            },
        )
    };

    let sweep = {
        let state = state.clone();
        spawn_periodic(
            "worker-sweep",
            config.heartbeat_interval(),
            false,
            shutdown.clone(),
            move || {
                let state = state.clone();
                async move {
                    match state.registry.sweep() {
                        Ok(flipped) => state
                            .metrics
                            .workers_marked_inactive
                            .add(flipped.len() as u64),
                        Err(e) => error!(error = %e, "Worker sweep failed"),
                    }
                }
            },
        )
    };

    let retry = {
        let state = state.clone();
        spawn_periodic(
            "sync-retry",
            config.replication_retry_interval(),
            false,
            shutdown,
            move || {
                let state = state.clone();
                async move {
                    state.replicator.retry_cycle().await;
                }
            },
        )
    };

    vec![monitor, sweep, retry]
}
