//! Browser driver contract.
//!
//! The paginator and the detail visitor only talk to a page through
//! [`BrowserPage`]. The Chromium adapter lives in [`crate::chromium`]; tests
//! drive the same components with scripted doubles.

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::time::Duration;

type BodyReader = Box<dyn FnOnce() -> BoxFuture<'static, Result<String>> + Send>;

/// One network response observed by a page.
pub struct ResponseEvent {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    body: BodyReader,
}

impl ResponseEvent {
    pub fn new<F>(url: String, status: u16, content_type: Option<String>, body: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, Result<String>> + Send + 'static,
    {
        Self {
            url,
            status,
            content_type,
            body: Box::new(body),
        }
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false)
    }

    /// Read the response body. Consumes the event.
    pub async fn text(self) -> Result<String> {
        (self.body)().await
    }
}

impl std::fmt::Debug for ResponseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseEvent")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Live subscription to a page's response events. Dropping it unsubscribes.
pub struct ResponseSubscription {
    events: BoxStream<'static, ResponseEvent>,
}

impl ResponseSubscription {
    pub fn new(events: BoxStream<'static, ResponseEvent>) -> Self {
        Self { events }
    }

    /// Take every event already delivered without waiting for more.
    pub fn drain_ready(&mut self) -> Vec<ResponseEvent> {
        let mut ready = Vec::new();
        while let Some(Some(event)) = self.events.next().now_or_never() {
            ready.push(event);
        }
        ready
    }
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait until the page is idle, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until at least one element matches `selector`. `Ok(false)` when
    /// the wait expires.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Values of `attribute` on every element matching `selector`.
    async fn attribute_values(&self, selector: &str, attribute: &str) -> Result<Vec<String>>;

    /// Start receiving response events. Events that arrive before this
    /// returns are not delivered.
    async fn subscribe_responses(&self) -> Result<ResponseSubscription>;
}
