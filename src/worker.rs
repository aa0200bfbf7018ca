//! The refresh loop.
//!
//! A single [`Worker`] wakes on a periodic tick or a manual trigger, lists
//! every feed and refreshes them with bounded concurrency. Manual triggers
//! go through a one-slot mailbox: while one is pending, further triggers are
//! dropped instead of queued.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RefreshSettings;
use crate::db::Database;
use crate::refresher::{FeedRefresher, RefreshOutcome};
use crate::source::FeedSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCause {
    Periodic,
    Manual,
}

/// Cheap, cloneable handle used to request a refresh from outside the loop.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Request a refresh without waiting. Returns `false` if a request is
    /// already pending or the worker has stopped.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("Manual refresh already pending, dropping trigger");
                false
            }
            Err(TrySendError::Closed(())) => {
                warn!("Refresh worker is not running, dropping trigger");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub feeds: usize,
    pub refreshed: usize,
    pub throttled: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
}

pub struct Worker {
    db: Arc<Database>,
    refresher: Arc<FeedRefresher>,
    limiter: Arc<Semaphore>,
    refresh_interval: Duration,
    triggers: mpsc::Receiver<()>,
}

impl Worker {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn FeedSource>,
        settings: RefreshSettings,
    ) -> (Self, RefreshHandle) {
        let (tx, triggers) = mpsc::channel(1);
        let worker = Self {
            refresher: Arc::new(FeedRefresher::new(db.clone(), source, &settings)),
            db,
            limiter: Arc::new(Semaphore::new(settings.max_concurrent_refreshes)),
            refresh_interval: settings.refresh_interval,
            triggers,
        };
        (worker, RefreshHandle { tx })
    }

    /// Run until `shutdown` becomes `true` (or its sender is dropped).
    ///
    /// The first periodic tick fires immediately, so feeds are refreshed on
    /// startup. Per-feed refreshes already spawned when shutdown arrives run
    /// to completion on their own.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.refresh_interval.as_secs(),
            "Starting refresh worker"
        );

        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let cause = tokio::select! {
                _ = ticker.tick() => RefreshCause::Periodic,
                Some(()) = self.triggers.recv() => RefreshCause::Manual,
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Shutdown requested, exiting refresh worker");
                    return;
                }
            };

            tokio::select! {
                result = self.refresh_all(cause) => {
                    if let Err(e) = result {
                        error!(error = %e, "Error refreshing feeds");
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Shutdown requested during refresh, exiting refresh worker");
                    return;
                }
            }
        }
    }

    /// Refresh every feed once. Only a failure to list the feeds fails the
    /// batch; individual feed failures are logged and counted.
    pub async fn refresh_all(&self, cause: RefreshCause) -> anyhow::Result<BatchSummary> {
        match cause {
            RefreshCause::Periodic => {
                let next_refresh = Utc::now()
                    + chrono::Duration::from_std(self.refresh_interval)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                info!(forced = false, %next_refresh, "Starting feed refresh");
            }
            RefreshCause::Manual => info!(forced = true, "Starting feed refresh"),
        }

        let feeds = self.db.get_all_feeds().await.context("listing feeds")?;
        info!(num_feeds = feeds.len(), "Found feeds");

        let mut handles = Vec::with_capacity(feeds.len());
        for feed in feeds {
            let permit = self
                .limiter
                .clone()
                .acquire_owned()
                .await
                .context("refresh limiter closed")?;
            let refresher = self.refresher.clone();

            handles.push(tokio::spawn(async move {
                let result = refresher.refresh(&feed).await;
                drop(permit);
                if let Err(e) = &result {
                    error!(feed_id = feed.id, url = %feed.url, error = %e, "Error refreshing feed");
                }
                result
            }));
        }

        let mut summary = BatchSummary {
            feeds: handles.len(),
            ..BatchSummary::default()
        };
        for handle in handles {
            match handle.await {
                Ok(Ok(RefreshOutcome::Refreshed { created, updated })) => {
                    summary.refreshed += 1;
                    summary.created += created;
                    summary.updated += updated;
                }
                Ok(Ok(RefreshOutcome::Throttled { .. })) => summary.throttled += 1,
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    error!(error = %e, "Feed refresh task did not complete");
                    summary.failed += 1;
                }
            }
        }

        info!(
            feeds = summary.feeds,
            refreshed = summary.refreshed,
            throttled = summary.throttled,
            failed = summary.failed,
            created = summary.created,
            updated = summary.updated,
            "Feed refresh complete"
        );

        Ok(summary)
    }
}
