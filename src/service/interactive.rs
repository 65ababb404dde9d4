// SPDX-License-Identifier: Apache-2.0

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{AgentMain, ProcessLifecycle, build_runtime};
use crate::init::BoxError;

/// Foreground process stopped by a termination signal.
pub struct Interactive;

impl ProcessLifecycle for Interactive {
    fn name(&self) -> &'static str {
        "interactive"
    }

    fn run(self: Box<Self>, agent: AgentMain) -> Result<(), BoxError> {
        let runtime = build_runtime()?;
        let stop = CancellationToken::new();

        runtime.block_on(async move {
            let watcher = {
                let stop = stop.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = signal_wait() => {
                            info!("Shutdown signal received.");
                            stop.cancel();
                        }
                        _ = stop.cancelled() => {}
                    }
                })
            };

            let result = agent(stop.clone()).await;
            stop.cancel();
            let _ = watcher.await;
            result
        })
    }
}

#[cfg(unix)]
async fn signal_wait() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sig_term, mut sig_int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Unable to install signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

#[cfg(not(unix))]
async fn signal_wait() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Unable to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
