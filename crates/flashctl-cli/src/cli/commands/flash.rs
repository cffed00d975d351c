//! `flashctl flash` – start a job and follow it to a terminal status.

use anyhow::{bail, Result};
use flashctl_core::config::FlashConfig;
use flashctl_core::job::{BuiltinCapabilities, FlashRequest};
use flashctl_core::transport::WsConnector;
use flashctl_core::{Confirmation, JobStatus, JobUpdate, Orchestrator};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::render;

pub async fn run_flash(cfg: FlashConfig, request: FlashRequest, confirm: Confirmation) -> Result<()> {
    let ctl = Orchestrator::spawn(cfg, Arc::new(WsConnector), Arc::new(BuiltinCapabilities))?;
    let mut updates = ctl.subscribe();

    let id = ctl.start_flash(request, confirm).await?;
    println!("job {id} started");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    if !update.job().answers_to(&id) {
                        continue;
                    }
                    match update {
                        JobUpdate::Changed(job) => println!("{}", render::progress_line(&job)),
                        JobUpdate::Finalized(job) => {
                            println!("{}", render::summary(&job));
                            break job.status;
                        }
                        JobUpdate::Removed { job, reason } => {
                            ctl.shutdown().await?;
                            bail!("backend rejected job {}: {}", job.id, reason);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "update stream lagged");
                }
                Err(RecvError::Closed) => bail!("orchestrator stopped"),
            },
            res = &mut ctrl_c => {
                res?;
                eprintln!("cancelling job {id} ...");
                let job = ctl.cancel_flash(&id, Confirmation::Optimistic).await?;
                println!("{}", render::summary(&job));
                break job.status;
            }
        }
    };

    ctl.shutdown().await?;
    if outcome == JobStatus::Failed {
        bail!("job {id} failed");
    }
    Ok(())
}
