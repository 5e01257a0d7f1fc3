//! Watch a path and print its changes

use crate::output::{Printer, Record};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use watcher::{
    observe_with, BatchObserver, CloseReason, Delivery, Event, Observation, ObserveError,
    Observer, PeriodicReconciler, Trackers, WatchConfig,
};

pub struct WatchArgs {
    pub path: PathBuf,
    pub follow: bool,
    pub interval_ms: Option<u64>,
    pub immediate: bool,
    pub watch_limit: Option<usize>,
    pub json: bool,
    pub config: Option<PathBuf>,
}

/// What the observation's reader thread hands to the printing task
enum Notice {
    Event(Event, Option<OsString>),
    Batch(bool, HashMap<OsString, Event>),
    Incomplete(String),
}

struct Forward(mpsc::UnboundedSender<Notice>);

impl Observer for Forward {
    fn on_event(&mut self, event: Event, child: Option<&OsStr>) {
        let _ = self.0.send(Notice::Event(event, child.map(OsStr::to_os_string)));
    }

    fn on_incomplete_observation(&mut self, cause: &ObserveError) {
        let _ = self.0.send(Notice::Incomplete(cause.to_string()));
    }
}

impl BatchObserver for Forward {
    fn on_latest_events(&mut self, self_changed: bool, children: HashMap<OsString, Event>) {
        let _ = self.0.send(Notice::Batch(self_changed, children));
    }

    fn on_incomplete_observation(&mut self, cause: &ObserveError) {
        let _ = self.0.send(Notice::Incomplete(cause.to_string()));
    }
}

fn load_config(args: &WatchArgs) -> Result<WatchConfig> {
    let mut config = match &args.config {
        Some(path) => WatchConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => WatchConfig::default(),
    };

    if args.follow {
        config.follow_links = true;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.interval_ms = interval_ms;
    }
    if args.watch_limit.is_some() {
        config.watch_limit = args.watch_limit;
    }
    Ok(config)
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let config = load_config(&args)?;
    let printer = Printer::new(args.json);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let delivery = if args.immediate {
        Delivery::Immediate(Box::new(Forward(tx.clone())))
    } else {
        Delivery::Batched {
            observer: Box::new(Forward(tx.clone())),
            interval: config.batch_interval(),
        }
    };
    drop(tx);

    let mut children = 0usize;
    let observation = observe_with(
        &args.path,
        config.observe_options(Trackers::new()),
        delivery,
        &mut |_| children += 1,
    )
    .with_context(|| format!("Failed to observe {}", args.path.display()))?;

    if observation.is_closed() {
        // Discovery-time notices are already queued
        while let Ok(Notice::Incomplete(reason)) = rx.try_recv() {
            printer.print(&Record::Incomplete { reason })?;
        }
        match observation.close_reason() {
            Some(CloseReason::Unsupported(what)) => {
                bail!("Cannot observe {}: {} is not supported", args.path.display(), what)
            }
            Some(CloseReason::Failed(reason)) => {
                bail!("Cannot observe {}: {}", args.path.display(), reason)
            }
            _ => bail!("{} disappeared before it could be observed", args.path.display()),
        }
    }

    printer.print(&Record::ready(
        &args.path,
        children,
        observation.watched_directories(),
    ))?;

    let (reconcile_tx, mut reconcile_rx) = mpsc::channel(16);
    let mut reconcile_tx = Some(reconcile_tx);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupted, closing observation");
                break;
            }
            notice = rx.recv() => {
                let Some(notice) = notice else {
                    // The reader is gone and has dropped the observer
                    break;
                };
                let record = match notice {
                    Notice::Event(event, child) => Record::event(event, child.as_ref()),
                    Notice::Batch(self_changed, changes) => Record::batch(self_changed, &changes),
                    Notice::Incomplete(reason) => {
                        if let Some(change_tx) = reconcile_tx.take() {
                            info!("Observation incomplete, falling back to periodic rescans");
                            let reconciler = PeriodicReconciler::new(
                                args.path.clone(),
                                config.link_option(),
                                config.reconcile_interval(),
                                change_tx,
                            );
                            tokio::spawn(async move {
                                if let Err(e) = reconciler.run().await {
                                    warn!("Periodic reconciliation stopped: {}", e);
                                }
                            });
                        }
                        Record::Incomplete { reason }
                    }
                };
                printer.print(&record)?;
            }
            Some(changes) = reconcile_rx.recv() => {
                printer.print(&Record::reconciled(&changes))?;
            }
        }
    }

    let reason = shut_down(observation).await?;
    printer.print(&Record::Closed {
        reason: format!("{:?}", reason),
    })?;

    match reason {
        CloseReason::Failed(reason) => bail!("Observation failed: {}", reason),
        _ => Ok(()),
    }
}

/// Close `observation` off the async workers, since closing joins its reader thread
async fn shut_down(mut observation: Observation) -> Result<CloseReason> {
    tokio::task::spawn_blocking(move || {
        observation.close();
        observation.close_reason().unwrap_or(CloseReason::Requested)
    })
    .await
    .context("Failed to close observation")
}
