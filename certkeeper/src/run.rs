// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::config::Config;
use crate::issuer::Issue;
use crate::manager::SecretManager;
use log::{error, info};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Headroom on top of the issuance deadline so the per-target bound always
/// outlives the orchestrator's own deadline race.
const TARGET_TIMEOUT_MARGIN: Duration = Duration::from_secs(60);

/// One pass over all targets, in configured order. A failing target is
/// reported and never blocks the targets after it.
pub async fn run_once(config: &Config, manager: &SecretManager, issuer: &dyn Issue) {
    let target_timeout = config.issue_timeout + TARGET_TIMEOUT_MARGIN;
    for target in config.targets() {
        let result = tokio::time::timeout(
            target_timeout,
            manager.ensure_tls_secret(&target, issuer),
        )
        .await;
        match result {
            Ok(Ok(())) => info!(
                "secret check for {}/{} completed successfully",
                target.namespace, target.secret_name
            ),
            Ok(Err(err)) => error!(
                "secret check for {}/{} failed: {}",
                target.namespace, target.secret_name, err
            ),
            Err(_) => error!(
                "secret check for {}/{} timed out after {:?}",
                target.namespace, target.secret_name, target_timeout
            ),
        }
    }
}

/// Runs one pass immediately, then repeats on the configured interval until
/// the shutdown channel fires. Shutdown is cooperative: a pass that is
/// already running finishes before the loop returns.
pub async fn run_periodically(
    config: &Config,
    manager: &SecretManager,
    issuer: &dyn Issue,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Running the initial secret check...");
    run_once(config, manager, issuer).await;

    info!(
        "Starting periodic secret checks every {:?}",
        config.run_interval
    );
    let mut ticker = interval_at(
        Instant::now() + config.run_interval,
        config.run_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!("Running periodic secret check...");
                run_once(config, manager, issuer).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutting down periodic secret checks...");
                    break;
                }
            }
        }
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("Failed to install SIGTERM handler: {}", err);
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            result = ctrl_c => { let _ = result; }
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
