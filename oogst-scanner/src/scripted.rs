//! Scripted [`BrowserPage`] for tests.
//!
//! Each URL maps to a [`PageScript`] describing the links the page renders,
//! the responses it emits while loading, and how navigation ends.

use crate::browser::{BrowserPage, ResponseEvent, ResponseSubscription};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Outcome {
    Loaded,
    Timeout,
    Failed(String),
}

#[derive(Debug, Clone)]
struct ScriptedResponse {
    url: String,
    status: u16,
    content_type: Option<String>,
    body: std::result::Result<String, String>,
}

#[derive(Debug, Clone)]
pub struct PageScript {
    outcome: Outcome,
    hrefs: Vec<String>,
    responses: Vec<ScriptedResponse>,
}

impl PageScript {
    pub fn new() -> Self {
        Self {
            outcome: Outcome::Loaded,
            hrefs: Vec::new(),
            responses: Vec::new(),
        }
    }

    pub fn link(mut self, href: &str) -> Self {
        self.hrefs.push(href.to_string());
        self
    }

    pub fn json(self, url: &str, body: &str) -> Self {
        self.response(url, 200, Some("application/json; charset=utf-8"), body)
    }

    pub fn response(mut self, url: &str, status: u16, content_type: Option<&str>, body: &str) -> Self {
        self.responses.push(ScriptedResponse {
            url: url.to_string(),
            status,
            content_type: content_type.map(str::to_string),
            body: Ok(body.to_string()),
        });
        self
    }

    /// A JSON response whose body can no longer be read.
    pub fn unreadable(mut self, url: &str) -> Self {
        self.responses.push(ScriptedResponse {
            url: url.to_string(),
            status: 200,
            content_type: Some("application/json".to_string()),
            body: Err("No resource with given identifier found".to_string()),
        });
        self
    }

    pub fn timeout(mut self) -> Self {
        self.outcome = Outcome::Timeout;
        self
    }

    pub fn failure(mut self, reason: &str) -> Self {
        self.outcome = Outcome::Failed(reason.to_string());
        self
    }
}

impl Default for PageScript {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct ScriptedPage {
    scripts: Mutex<HashMap<String, PageScript>>,
    subscribers: Mutex<Vec<UnboundedSender<ResponseEvent>>>,
    navigations: Mutex<Vec<String>>,
    current: Mutex<Option<String>>,
    body_reads: Arc<AtomicUsize>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, script: PageScript) -> Self {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
        self
    }

    /// Every URL passed to `goto`, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    /// How many response bodies have been read, successfully or not.
    pub fn body_reads(&self) -> usize {
        self.body_reads.load(Ordering::SeqCst)
    }

    pub fn live_subscribers(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Emit a response outside of any navigation.
    pub fn emit(&self, url: &str, content_type: &str, body: &str) {
        let response = ScriptedResponse {
            url: url.to_string(),
            status: 200,
            content_type: Some(content_type.to_string()),
            body: Ok(body.to_string()),
        };
        self.broadcast(&[response]);
    }

    fn broadcast(&self, responses: &[ScriptedResponse]) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            for response in responses {
                let body = response.body.clone();
                let reads = Arc::clone(&self.body_reads);
                let event = ResponseEvent::new(
                    response.url.clone(),
                    response.status,
                    response.content_type.clone(),
                    move || {
                        reads.fetch_add(1, Ordering::SeqCst);
                        async move { body.map_err(ScanError::Browser) }.boxed()
                    },
                );
                let _ = tx.unbounded_send(event);
            }
        }
    }

    fn current_hrefs(&self, selector: &str) -> Vec<String> {
        let current = self.current.lock().unwrap().clone();
        let Some(url) = current else {
            return Vec::new();
        };
        let needle = selector_substring(selector);
        self.scripts
            .lock()
            .unwrap()
            .get(&url)
            .map(|script| {
                script
                    .hrefs
                    .iter()
                    .filter(|href| needle.as_deref().is_none_or(|n| href.contains(n)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// `a[href*='/details/']` -> `/details/`
fn selector_substring(selector: &str) -> Option<String> {
    let start = selector.find("*=")? + 2;
    let rest = selector[start..].trim_start_matches(['\'', '"']);
    let end = rest.find(['\'', '"', ']'])?;
    Some(rest[..end].to_string())
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        let script = self.scripts.lock().unwrap().get(url).cloned().unwrap_or_default();
        *self.current.lock().unwrap() = Some(url.to_string());

        self.broadcast(&script.responses);

        match script.outcome {
            Outcome::Loaded => Ok(()),
            Outcome::Timeout => Err(ScanError::NavigationTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            }),
            Outcome::Failed(reason) => Err(ScanError::Navigation {
                url: url.to_string(),
                reason,
            }),
        }
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(!self.current_hrefs(selector).is_empty())
    }

    async fn attribute_values(&self, selector: &str, attribute: &str) -> Result<Vec<String>> {
        if attribute != "href" {
            return Ok(Vec::new());
        }
        Ok(self.current_hrefs(selector))
    }

    async fn subscribe_responses(&self) -> Result<ResponseSubscription> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        Ok(ResponseSubscription::new(rx.boxed()))
    }
}
