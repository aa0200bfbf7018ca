//! Unread - a feed reader with a background refresh engine
//!
//! Feeds are refreshed periodically or on demand by a [`worker::Worker`],
//! which deduplicates fetched items against the SQLite store and commits
//! each feed's changes in a single transaction. A small web interface lists
//! unread and read items.

pub mod config;
pub mod db;
pub mod error;
pub mod refresher;
pub mod resolver;
pub mod routes;
pub mod source;
pub mod worker;
