use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::SqlitePoolOptions, FromRow, Sqlite, SqliteConnection, SqlitePool, Transaction,
};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::FeedConfig;

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub image: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum ItemStatus {
    Unread,
    Read,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Unread => "unread",
            ItemStatus::Read => "read",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub hash: String,
    pub status: ItemStatus,
}

/// An item joined with the title of its feed, as shown on the pages.
#[derive(Debug, Clone, FromRow)]
pub struct PageItem {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub status: ItemStatus,
}

#[derive(Debug, Clone)]
pub struct NewItem<'a> {
    pub feed_id: i64,
    pub title: &'a str,
    pub link: &'a str,
    pub description: &'a str,
    pub published_at: Option<DateTime<Utc>>,
    pub hash: &'a str,
}

#[derive(Debug, Clone)]
pub struct ItemUpdate<'a> {
    pub id: i64,
    pub title: &'a str,
    pub link: &'a str,
    pub description: &'a str,
    pub published_at: Option<DateTime<Utc>>,
}

/// The item store.
///
/// SQLite tolerates a single writer, so every write transaction goes
/// through [`Database::begin_write`], which holds the store's write lock
/// until the transaction is committed or rolled back. Reads use the pool
/// directly.
pub struct Database {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

/// A write transaction holding the store's write lock.
pub struct WriteTxn<'a> {
    tx: Transaction<'static, Sqlite>,
    _guard: MutexGuard<'a, ()>,
}

impl WriteTxn<'_> {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                image TEXT,
                last_refreshed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                published_at TEXT,
                hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'unread'
                    CHECK (status IN ('unread', 'read')),
                UNIQUE(feed_id, hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_items_status_published
            ON items(status, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert feeds from the configuration. Existing feeds (matched by URL)
    /// only get their title updated.
    pub async fn sync_feeds(&self, configs: &[FeedConfig]) -> anyhow::Result<()> {
        let mut txn = self.begin_write().await?;
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO feeds (title, url)
                VALUES (?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    title = excluded.title
                "#,
            )
            .bind(&config.title)
            .bind(&config.url)
            .execute(txn.conn())
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Start a write transaction, waiting for the write lock first.
    pub async fn begin_write(&self) -> Result<WriteTxn<'_>, sqlx::Error> {
        let guard = self.write_lock.lock().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTxn { tx, _guard: guard })
    }

    pub async fn get_all_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let mut conn = self.pool.acquire().await?;
        Ok(list_feeds(&mut conn).await?)
    }

    pub async fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_items_for_feed(&self, feed_id: i64) -> anyhow::Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            "SELECT * FROM items WHERE feed_id = ? ORDER BY id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn list_items(
        &self,
        status: ItemStatus,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<PageItem>> {
        let items = sqlx::query_as::<_, PageItem>(
            r#"
            SELECT items.id, items.feed_id, feeds.title AS feed_title,
                   items.title, items.link, items.description,
                   items.published_at, items.status
            FROM items
            JOIN feeds ON feeds.id = items.feed_id
            WHERE items.status = ?
            ORDER BY items.published_at DESC NULLS LAST, items.id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn count_items(&self, status: ItemStatus) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE status = ?")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Returns `false` when no item has the given id.
    pub async fn set_item_status(&self, item_id: i64, status: ItemStatus) -> anyhow::Result<bool> {
        let mut txn = self.begin_write().await?;
        let result = sqlx::query("UPDATE items SET status = ? WHERE id = ?")
            .bind(status)
            .bind(item_id)
            .execute(txn.conn())
            .await?;
        txn.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

pub async fn list_feeds(conn: &mut SqliteConnection) -> Result<Vec<Feed>, sqlx::Error> {
    sqlx::query_as::<_, Feed>("SELECT * FROM feeds ORDER BY id")
        .fetch_all(conn)
        .await
}

pub async fn find_item(
    conn: &mut SqliteConnection,
    feed_id: i64,
    hash: &str,
) -> Result<Option<Item>, sqlx::Error> {
    sqlx::query_as::<_, Item>("SELECT * FROM items WHERE feed_id = ? AND hash = ?")
        .bind(feed_id)
        .bind(hash)
        .fetch_optional(conn)
        .await
}

pub async fn create_item(
    conn: &mut SqliteConnection,
    item: &NewItem<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO items (feed_id, title, link, description, published_at, hash, status)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.feed_id)
    .bind(item.title)
    .bind(item.link)
    .bind(item.description)
    .bind(item.published_at)
    .bind(item.hash)
    .bind(ItemStatus::Unread)
    .execute(conn)
    .await?;
    Ok(())
}

/// Update the content of an item. The read status is left untouched.
pub async fn update_item(
    conn: &mut SqliteConnection,
    update: &ItemUpdate<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE items
        SET title = ?, link = ?, description = ?, published_at = ?
        WHERE id = ?
        "#,
    )
    .bind(update.title)
    .bind(update.link)
    .bind(update.description)
    .bind(update.published_at)
    .bind(update.id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn update_feed_image(
    conn: &mut SqliteConnection,
    feed_id: i64,
    image: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE feeds SET image = ? WHERE id = ?")
        .bind(image)
        .bind(feed_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn update_feed_last_refreshed_at(
    conn: &mut SqliteConnection,
    feed_id: i64,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE feeds SET last_refreshed_at = ? WHERE id = ?")
        .bind(now)
        .bind(feed_id)
        .execute(conn)
        .await?;
    Ok(())
}
