//! Chromium implementation of the browser contract, over CDP.

use crate::browser::{BrowserPage, ResponseEvent, ResponseSubscription};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::{FutureExt, Stream, StreamExt};
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// Fallback for pages that never report `networkIdle`: resolves once the DOM
/// is interactive, and gives up after 10s on its own.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    pub headless: bool,
    pub user_agent: String,
    pub chrome_executable: Option<PathBuf>,
    pub chrome_args: Vec<String>,
    /// DevTools endpoint of an already running Chrome, e.g. `http://127.0.0.1:9222`.
    pub remote_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chrome_executable: None,
            chrome_args: Vec::new(),
            remote_url: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

fn browser_err(e: CdpError) -> ScanError {
    ScanError::Browser(e.to_string())
}

/// A running (or attached) Chromium instance.
///
/// Call [`ChromiumSession::close`] when done. Dropping the session without
/// closing still stops the CDP handler, and chromiumoxide kills a launched
/// child process on drop.
pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
    user_agent: String,
    owned: bool,
}

impl ChromiumSession {
    pub async fn launch(options: &ChromiumOptions) -> Result<Self> {
        if let Some(remote_url) = &options.remote_url {
            return Self::connect(remote_url, options).await;
        }

        info!("Launching browser (headless={})", options.headless);

        let mut builder = BrowserConfig::builder().request_timeout(options.request_timeout);
        if let Some(path) = &options.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if !options.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        for arg in &options.chrome_args {
            builder = builder.arg(arg.clone());
        }

        let config = builder
            .build()
            .map_err(|e| ScanError::Browser(format!("Failed to build browser config: {}", e)))?;
        let (browser, handler) = Browser::launch(config).await.map_err(browser_err)?;

        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            user_agent: options.user_agent.clone(),
            owned: true,
        })
    }

    async fn connect(remote_url: &str, options: &ChromiumOptions) -> Result<Self> {
        info!("Connecting to remote browser at {}", remote_url);
        let ws_url = resolve_websocket_url(remote_url).await?;
        let (browser, handler) = Browser::connect(ws_url).await.map_err(browser_err)?;

        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            user_agent: options.user_agent.clone(),
            owned: false,
        })
    }

    /// Open a blank page with the configured user agent and network events on.
    pub async fn new_page(&self) -> Result<ChromiumPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(browser_err)?;
        page.execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await
            .map_err(browser_err)?;
        page.execute(EnableParams::default())
            .await
            .map_err(browser_err)?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(browser_err)?;
        Ok(ChromiumPage { page })
    }

    pub async fn close(mut self) {
        if self.owned {
            if let Err(e) = self.browser.close().await {
                warn!("Failed to close browser cleanly: {}", e);
            }
            if let Err(e) = self.browser.wait().await {
                warn!("Failed waiting for browser exit: {}", e);
            }
        }
        self.handler.abort();
        debug!("Browser session closed");
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("CDP handler error: {}", e);
            }
        }
    })
}

/// Look up the DevTools websocket URL behind an HTTP (or ws) endpoint.
pub async fn resolve_websocket_url(remote_url: &str) -> Result<String> {
    if remote_url.contains("/devtools/browser/") {
        return Ok(remote_url.to_string());
    }
    let http_url = remote_url
        .replace("ws://", "http://")
        .replace("wss://", "https://");
    let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

    let version: serde_json::Value = reqwest::get(&version_url).await?.json().await?;
    version
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ScanError::Browser(format!("No webSocketDebuggerUrl at {}", version_url)))
}

pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn wait_until_ready(&self) {
        match self.page.evaluate(WAIT_FOR_READY_SCRIPT).await {
            Ok(result) => {
                let state: String = result.into_value().unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Err(e) => debug!("Could not check ready state: {}", e),
        }
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    /// Navigate, then wait for the main frame to go network-idle within the
    /// same `timeout`. If idle never comes, fall back to the DOM ready check.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let main_frame = match self.page.mainframe().await {
            Ok(frame) => frame.map(|id| id.inner().clone()),
            Err(e) => {
                debug!("Could not resolve main frame: {}", e);
                None
            }
        };
        // subscribe before navigating so the new document's events are buffered
        let lifecycle = self
            .page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(browser_err)?
            .map(|event| (event.frame_id.inner().clone(), event.name.clone()));

        let navigation = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<(), CdpError>(())
        };

        match tokio::time::timeout(timeout, navigation).await {
            Ok(Ok(())) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let idle = wait_for_network_idle(Box::pin(lifecycle), main_frame.as_deref());
                match tokio::time::timeout(remaining, idle).await {
                    Ok(true) => debug!("Network idle on {}", url),
                    _ => {
                        debug!("No networkIdle for {}, checking ready state", url);
                        self.wait_until_ready().await;
                    }
                }
                Ok(())
            }
            Ok(Err(e)) => Err(ScanError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ScanError::NavigationTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            }),
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.find_elements(selector).await {
                Ok(elements) if !elements.is_empty() => return Ok(true),
                Ok(_) => {}
                Err(e) => debug!("Selector {} not matched yet: {}", selector, e),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn attribute_values(&self, selector: &str, attribute: &str) -> Result<Vec<String>> {
        let html = self.page.content().await.map_err(browser_err)?;
        extract_attribute_values(&html, selector, attribute)
    }

    async fn subscribe_responses(&self) -> Result<ResponseSubscription> {
        let events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(browser_err)?;
        let page = self.page.clone();

        let stream = events.map(move |event| {
            let page = page.clone();
            let request_id = event.request_id.clone();
            ResponseEvent::new(
                event.response.url.clone(),
                u16::try_from(event.response.status).unwrap_or(0),
                Some(event.response.mime_type.clone()),
                move || async move { read_body(&page, request_id).await }.boxed(),
            )
        });

        Ok(ResponseSubscription::new(stream.boxed()))
    }
}

/// Wait for `networkIdle` on `main_frame` after its new document started.
///
/// Events are `(frame_id, name)` pairs. Returns `false` if the stream ends first.
async fn wait_for_network_idle<S>(mut events: S, main_frame: Option<&str>) -> bool
where
    S: Stream<Item = (String, String)> + Unpin,
{
    let mut started = false;
    while let Some((frame, name)) = events.next().await {
        if main_frame.is_some_and(|main| main != frame) {
            continue;
        }
        match name.as_str() {
            "init" => started = true,
            "networkIdle" if started => return true,
            _ => {}
        }
    }
    false
}

async fn read_body(page: &Page, request_id: RequestId) -> Result<String> {
    let response = page
        .execute(GetResponseBodyParams::new(request_id))
        .await
        .map_err(browser_err)?;
    if response.result.base64_encoded {
        let bytes = STANDARD
            .decode(&response.result.body)
            .map_err(|e| ScanError::Other(format!("Invalid base64 body: {}", e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Ok(response.result.body.clone())
    }
}

fn extract_attribute_values(html: &str, selector: &str, attribute: &str) -> Result<Vec<String>> {
    let selector = Selector::parse(selector)
        .map_err(|e| ScanError::Other(format!("Invalid selector {}: {:?}", selector, e)))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .filter_map(|element| element.value().attr(attribute))
        .map(str::to_string)
        .collect())
}
