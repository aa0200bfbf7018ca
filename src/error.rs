use std::time::Duration;

use thiserror::Error;

/// Failure to obtain a parsed feed document.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed feed document: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

/// Failure of a single feed's refresh. The refresh loop logs these and
/// moves on to the other feeds.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("fetching feed: {0}")]
    Fetch(#[from] FetchError),

    #[error("fetching feed: no response within {0:?}")]
    Timeout(Duration),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}
