//! `flashctl watch` – print every job update and connection change.

use anyhow::Result;
use flashctl_core::config::FlashConfig;
use flashctl_core::job::BuiltinCapabilities;
use flashctl_core::transport::WsConnector;
use flashctl_core::{JobUpdate, Orchestrator};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::render;

pub async fn run_watch(cfg: FlashConfig) -> Result<()> {
    println!("watching {} (Ctrl-C to stop)", cfg.endpoint);
    let ctl = Orchestrator::spawn(cfg, Arc::new(WsConnector), Arc::new(BuiltinCapabilities))?;
    let mut updates = ctl.subscribe();
    let mut state = ctl.connection_state();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(JobUpdate::Changed(job)) => println!("{}", render::progress_line(&job)),
                Ok(JobUpdate::Finalized(job)) => println!("{}", render::summary(&job)),
                Ok(JobUpdate::Removed { job, reason }) => {
                    println!("{} rejected: {}", job.id, reason);
                }
                Err(RecvError::Lagged(skipped)) => println!("... {skipped} updates skipped"),
                Err(RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                println!("{}", render::connection(&current));
            }
            res = &mut ctrl_c => {
                res?;
                break;
            }
        }
    }

    ctl.shutdown().await?;
    Ok(())
}
