//! Feed sources: where refreshed feed documents come from.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

const USER_AGENT: &str = "unread/0.1 (RSS Reader)";

/// Timeout of the HTTP client itself. The refresher applies its own, usually
/// shorter, deadline on top of this.
const CLIENT_TIMEOUT_SECS: u64 = 30;

/// A parsed feed, reduced to what the refresh engine stores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDocument {
    pub title: String,
    pub image: Option<String>,
    pub items: Vec<RemoteItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteItem {
    pub guid: String,
    pub link: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedDocument {
    /// Parse an RSS, Atom or JSON feed.
    pub fn parse(bytes: &[u8]) -> Result<Self, FetchError> {
        Ok(parser::parse(bytes)?.into())
    }
}

impl From<feed_rs::model::Feed> for FeedDocument {
    fn from(feed: feed_rs::model::Feed) -> Self {
        let image = feed.logo.or(feed.icon).map(|image| image.uri);
        let items = feed.entries.into_iter().map(RemoteItem::from).collect();

        Self {
            title: feed.title.map(|t| t.content).unwrap_or_default(),
            image,
            items,
        }
    }
}

impl From<feed_rs::model::Entry> for RemoteItem {
    fn from(entry: feed_rs::model::Entry) -> Self {
        Self {
            guid: entry.id,
            link: entry
                .links
                .into_iter()
                .next()
                .map(|l| l.href)
                .unwrap_or_default(),
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            description: entry.summary.map(|t| t.content).unwrap_or_default(),
            content: entry.content.and_then(|c| c.body).unwrap_or_default(),
            published_at: entry.published.or(entry.updated),
        }
    }
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FeedDocument, FetchError>;
}

/// Fetches feeds over HTTP and parses them with `feed-rs`.
pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<FeedDocument, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let bytes = response.bytes().await?;
        debug!(url, bytes = bytes.len(), "Fetched feed document");

        FeedDocument::parse(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0">
            <channel>
                <title>Tech News</title>
                <link>https://technews.example.com</link>
                <description>Latest tech news</description>
                <image>
                    <url>https://technews.example.com/logo.png</url>
                    <title>Tech News</title>
                    <link>https://technews.example.com</link>
                </image>
                <item>
                    <title>Breaking: New Technology Announced</title>
                    <link>https://technews.example.com/article/1</link>
                    <guid>tag:technews,1</guid>
                    <description>Something happened</description>
                    <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                </item>
                <item>
                    <title>Review: Latest Gadget</title>
                    <link>https://technews.example.com/article/2</link>
                    <guid>tag:technews,2</guid>
                    <pubDate>Mon, 09 Dec 2024 10:00:00 +0200</pubDate>
                </item>
            </channel>
        </rss>
    "#;

    #[test]
    fn test_parse_rss_document() {
        let doc = FeedDocument::parse(RSS.as_bytes()).unwrap();

        assert_eq!(doc.title, "Tech News");
        assert_eq!(
            doc.image.as_deref(),
            Some("https://technews.example.com/logo.png")
        );
        assert_eq!(doc.items.len(), 2);

        let first = &doc.items[0];
        assert_eq!(first.guid, "tag:technews,1");
        assert_eq!(first.link, "https://technews.example.com/article/1");
        assert_eq!(first.title, "Breaking: New Technology Announced");
        assert_eq!(first.description, "Something happened");
        assert_eq!(
            first.published_at,
            Some(Utc.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_published_at_normalized_to_utc() {
        let doc = FeedDocument::parse(RSS.as_bytes()).unwrap();
        assert_eq!(
            doc.items[1].published_at,
            Some(Utc.with_ymd_and_hms(2024, 12, 9, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_garbage_fails() {
        let result = FeedDocument::parse(b"this is not a feed");
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_http_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;

        let source = HttpFeedSource::new().unwrap();
        let doc = source
            .fetch(&format!("{}/feed.xml", server.uri()))
            .await
            .unwrap();

        assert_eq!(doc.items.len(), 2);
    }

    #[tokio::test]
    async fn test_http_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpFeedSource::new().unwrap();
        let result = source.fetch(&format!("{}/missing.xml", server.uri())).await;

        assert!(matches!(
            result,
            Err(FetchError::Status(status)) if status == reqwest::StatusCode::NOT_FOUND
        ));
    }
}
