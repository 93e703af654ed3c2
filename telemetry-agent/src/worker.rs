//! Periodic reporting of sampled metrics.
//!
//! Every report interval the [`Worker`] takes a snapshot from its [`Monitor`], splits it into
//! batches of [`BATCH_SIZE`] metrics and queues them for a fixed pool of senders. The queue holds
//! as many batches as there are senders, so a slow server pushes back on the worker instead of
//! letting batches pile up.
use std::{sync::Arc, time::Duration};

use telemetry_core::{Metric, Snapshot};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{reporter::Reporter, sampler::Monitor};

/// Maximum number of metrics in a batch.
pub const BATCH_SIZE: usize = 10;

/// Splits a snapshot into batches of at most [`BATCH_SIZE`] metrics.
pub fn batches(snapshot: Snapshot) -> Vec<Vec<Metric>> {
    let mut batches = Vec::with_capacity(snapshot.len().div_ceil(BATCH_SIZE));
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    for metric in snapshot.into_metrics() {
        batch.push(metric);
        if batch.len() == BATCH_SIZE {
            batches.push(std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE)));
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

/// Reports snapshots on a fixed interval through a pool of senders.
pub struct Worker {
    monitor: Arc<dyn Monitor>,
    reporter: Arc<dyn Reporter>,
    report_interval: Duration,
    rate_limit: usize,
}

impl Worker {
    /// Creates a worker reporting snapshots of `monitor` through `reporter` every
    /// `report_interval`, with at most `rate_limit` batches in flight.
    pub fn new(
        monitor: Arc<dyn Monitor>,
        reporter: Arc<dyn Reporter>,
        report_interval: Duration,
        rate_limit: usize,
    ) -> Self {
        Worker { monitor, reporter, report_interval, rate_limit: rate_limit.max(1) }
    }

    /// Runs the worker until `token` is cancelled.
    ///
    /// Once cancelled, no further snapshots are taken; batches already queued are still sent
    /// before this returns.
    pub async fn run(self, token: CancellationToken) {
        let (tx, rx) = mpsc::channel::<Vec<Metric>>(self.rate_limit);
        let rx = Arc::new(Mutex::new(rx));

        let mut senders = JoinSet::new();
        for id in 0..self.rate_limit {
            senders.spawn(send_batches(id, Arc::clone(&rx), Arc::clone(&self.reporter)));
        }

        'report: while !token.is_cancelled() {
            let batches = batches(self.monitor.snapshot());
            debug!(batches = batches.len(), "Queueing snapshot.");

            for batch in batches {
                tokio::select! {
                    _ = token.cancelled() => break 'report,
                    sent = tx.send(batch) => if sent.is_err() {
                        break 'report;
                    },
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.report_interval) => {}
            }
        }

        drop(tx);
        while senders.join_next().await.is_some() {}
        info!("Reporting stopped.");
    }
}

async fn send_batches(
    id: usize,
    batches: Arc<Mutex<mpsc::Receiver<Vec<Metric>>>>,
    reporter: Arc<dyn Reporter>,
) {
    loop {
        let Some(batch) = batches.lock().await.recv().await else {
            break;
        };

        let len = batch.len();
        match reporter.report_batch(batch).await {
            Ok(()) => debug!(sender = id, metrics = len, "Batch reported."),
            Err(e) => error!(sender = id, metrics = len, error = %e, "Failed to report batch."),
        }
    }
}
