//! Refresh of a single feed.
//!
//! A refresh is throttled per feed, fetched under a deadline and written in
//! one transaction, so a feed's items either all land or none do.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::RefreshSettings;
use crate::db::{self, Database, Feed};
use crate::error::RefreshError;
use crate::resolver::{self, ResolveCounts};
use crate::source::{FeedDocument, FeedSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The feed was refreshed too recently; nothing was fetched or written.
    Throttled { retry_at: DateTime<Utc> },
    Refreshed { created: usize, updated: usize },
}

/// Refreshes one feed at a time: throttle check, fetch, then a single
/// transaction for all of the feed's writes.
pub struct FeedRefresher {
    db: Arc<Database>,
    source: Arc<dyn FeedSource>,
    throttle_window: Duration,
    fetch_timeout: Duration,
}

impl FeedRefresher {
    pub fn new(db: Arc<Database>, source: Arc<dyn FeedSource>, settings: &RefreshSettings) -> Self {
        Self {
            db,
            source,
            throttle_window: settings.throttle_window,
            fetch_timeout: settings.fetch_timeout,
        }
    }

    pub async fn refresh(&self, feed: &Feed) -> Result<RefreshOutcome, RefreshError> {
        let span = info_span!("refresh_feed", feed_id = feed.id, url = %feed.url);
        self.refresh_at(feed, Utc::now()).instrument(span).await
    }

    /// When the feed may be refreshed again, if that is still after `now`.
    pub fn throttled_until(&self, feed: &Feed, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let last = feed.last_refreshed_at?;
        let window = chrono::Duration::from_std(self.throttle_window).ok()?;
        let until = last.checked_add_signed(window)?;
        (until > now).then_some(until)
    }

    async fn refresh_at(
        &self,
        feed: &Feed,
        now: DateTime<Utc>,
    ) -> Result<RefreshOutcome, RefreshError> {
        if let Some(retry_at) = self.throttled_until(feed, now) {
            warn!(%retry_at, "Refresh triggered too quickly. Try again later.");
            return Ok(RefreshOutcome::Throttled { retry_at });
        }

        info!("Refreshing feed");

        let document = tokio::time::timeout(self.fetch_timeout, self.source.fetch(&feed.url))
            .await
            .map_err(|_| RefreshError::Timeout(self.fetch_timeout))??;

        let counts = self.commit(feed, &document, now).await?;

        info!(
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            "Successfully refreshed feed"
        );

        Ok(RefreshOutcome::Refreshed {
            created: counts.created,
            updated: counts.updated,
        })
    }

    async fn commit(
        &self,
        feed: &Feed,
        document: &FeedDocument,
        now: DateTime<Utc>,
    ) -> Result<ResolveCounts, RefreshError> {
        let mut txn = self.db.begin_write().await?;

        match write_feed(txn.conn(), feed, document, now).await {
            Ok(counts) => {
                txn.commit().await?;
                Ok(counts)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back transaction");
                }
                Err(e.into())
            }
        }
    }
}

async fn write_feed(
    conn: &mut SqliteConnection,
    feed: &Feed,
    document: &FeedDocument,
    now: DateTime<Utc>,
) -> Result<ResolveCounts, sqlx::Error> {
    let counts =
        resolver::apply_items(conn, feed.id, &document.items, feed.last_refreshed_at).await?;

    if let Some(image) = &document.image {
        if let Err(e) = db::update_feed_image(conn, feed.id, image).await {
            error!(error = %e, "Failed to update feeds.image");
        }
    }

    if let Err(e) = db::update_feed_last_refreshed_at(conn, feed.id, now).await {
        error!(error = %e, "Failed to update feeds.last_refreshed_at");
    }

    Ok(counts)
}
