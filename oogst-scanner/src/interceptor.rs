use crate::browser::{BrowserPage, ResponseSubscription};
use crate::error::Result;
use tracing::{debug, warn};

/// Bodies this short are pings or empty envelopes.
pub const DEFAULT_MIN_BODY_LEN: usize = 10;

/// A JSON response body read while the interceptor was attached.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCapture {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Records JSON responses for one navigation at a time.
///
/// `attach` must be called before the navigation starts and `detach` after it
/// settles. The same interceptor is reused for the next navigation; any
/// subscription still held is dropped on re-attach and on drop.
pub struct ResponseInterceptor {
    min_body_len: usize,
    subscription: Option<ResponseSubscription>,
}

impl ResponseInterceptor {
    pub fn new(min_body_len: usize) -> Self {
        Self {
            min_body_len,
            subscription: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub async fn attach(&mut self, page: &dyn BrowserPage) -> Result<()> {
        // never carry a previous navigation's events forward
        self.subscription = None;
        self.subscription = Some(page.subscribe_responses().await?);
        debug!("Response interceptor attached");
        Ok(())
    }

    /// Unsubscribe without reading anything, for a navigation that failed.
    pub fn abandon(&mut self) {
        if self.subscription.take().is_some() {
            debug!("Response interceptor abandoned");
        }
    }

    /// Unsubscribe and read the bodies of the JSON responses seen so far.
    pub async fn detach(&mut self) -> Vec<RawCapture> {
        let Some(mut subscription) = self.subscription.take() else {
            return Vec::new();
        };
        let events = subscription.drain_ready();
        drop(subscription);
        debug!("Response interceptor detached with {} pending events", events.len());

        let mut captured = Vec::new();
        for event in events {
            if !event.is_json() {
                continue;
            }
            let url = event.url.clone();
            let status = event.status;
            match event.text().await {
                Ok(body) if body.len() > self.min_body_len => {
                    captured.push(RawCapture { url, status, body });
                }
                Ok(_) => debug!("Skipping trivial JSON body from {}", url),
                Err(e) => warn!("Error capturing response from {}: {}", url, e),
            }
        }
        captured
    }
}

impl Default for ResponseInterceptor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BODY_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedPage;

    #[tokio::test]
    async fn test_detach_reads_json_bodies() {
        let page = ScriptedPage::new();
        let mut interceptor = ResponseInterceptor::default();
        interceptor.attach(&page).await.unwrap();
        page.emit("https://x/api/doc", "application/json", r#"{"document": {"pid": "p1"}}"#);
        page.emit("https://x/app.css", "text/css", "body { margin: 0 }");

        let captured = interceptor.detach().await;
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].url, "https://x/api/doc");
        assert_eq!(page.body_reads(), 1);
        assert!(!interceptor.is_attached());
    }

    #[tokio::test]
    async fn test_abandon_drops_events_unread() {
        let page = ScriptedPage::new();
        let mut interceptor = ResponseInterceptor::default();
        interceptor.attach(&page).await.unwrap();
        page.emit("https://x/api/doc", "application/json", r#"{"document": {"pid": "p1"}}"#);

        interceptor.abandon();
        assert!(!interceptor.is_attached());
        assert_eq!(page.live_subscribers(), 0);
        assert!(interceptor.detach().await.is_empty());
        assert_eq!(page.body_reads(), 0);
    }
}
