// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bounded_channel::bounded;
use crate::harvester::input::FileId;
use crate::harvester::{Harvester, HarvesterConfig};
use crate::init::BoxError;
use crate::init::args::HarvestArgs;
use crate::init::registry::Registry;
use crate::init::spooler::Spooler;

/// Final outcome of one harvester
struct Finished {
    path: PathBuf,
    offset: Option<i64>,
}

/// Harvests a fixed set of files, writes events to stdout and keeps the
/// offset registry up to date.
pub struct Agent {
    args: HarvestArgs,
    config: HarvesterConfig,
}

impl Agent {
    pub fn new(args: HarvestArgs) -> Result<Self, BoxError> {
        let config = args.build_config()?;
        Ok(Self { args, config })
    }

    /// Run until every harvester has stopped, either on its own or because
    /// `cancel` fired, then persist the final offsets.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BoxError> {
        let mut registry = Registry::load(&self.args.registry_file)?;

        let (events_tx, events_rx) = bounded(self.args.spool_size.max(1));
        let spooler =
            tokio::task::spawn_blocking(move || Spooler::new(events_rx, io::stdout()).run());

        let limit = Arc::new(Semaphore::new(self.args.max_harvesters.max(1)));
        let mut harvests: JoinSet<Finished> = JoinSet::new();

        for path in &self.args.paths {
            let resume = registry.resume_point(path);
            let (state_tx, state_rx) = bounded::<i64>(1);
            let mut harvester = Harvester::new(
                path.clone(),
                resume.map_or(0, |(_, offset)| offset),
                self.config.clone(),
                events_tx.clone(),
                Some(state_tx),
                cancel.child_token(),
            )?;
            if let Some((id, _)) = resume {
                harvester = harvester.with_resume_id(id);
            }

            let limit = limit.clone();
            let cancel = cancel.clone();
            harvests.spawn(async move {
                let path = harvester.path().to_path_buf();
                let permit = tokio::select! {
                    permit = limit.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                let Some(_permit) = permit else {
                    return Finished { path, offset: None };
                };

                match tokio::task::spawn_blocking(move || harvester.run()).await {
                    Ok(_) => {}
                    Err(e) => error!(path = ?path, error = ?e, "Failed to join with harvester"),
                }
                Finished {
                    path,
                    offset: state_rx.try_recv(),
                }
            });
        }
        drop(events_tx);

        let mut finished = Vec::with_capacity(self.args.paths.len());
        while let Some(joined) = harvests.join_next().await {
            match joined {
                Ok(f) => finished.push(f),
                Err(e) => error!(error = ?e, "Failed to join with harvester task"),
            }
        }

        let summary = spooler.await??;
        for f in finished {
            let Some(offset) = f.offset else {
                continue;
            };
            match summary.states.get(&f.path) {
                Some(state) => {
                    registry.update(&f.path, FileId::new(state.os.dev, state.os.ino), offset)
                }
                None => warn!(path = ?f.path, "No file state seen, keeping previous registry entry"),
            }
        }
        registry.save()?;

        info!(
            published = summary.published,
            heartbeats = summary.heartbeats,
            files = registry.len(),
            "All harvesters stopped"
        );
        Ok(())
    }
}
