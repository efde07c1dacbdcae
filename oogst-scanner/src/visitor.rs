use crate::browser::BrowserPage;
use crate::capture::{CaptureBundle, CapturedResponse};
use crate::interceptor::{DEFAULT_MIN_BODY_LEN, ResponseInterceptor};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct VisitOptions {
    pub navigation_timeout: Duration,
    /// Pause after readiness so late client-side API calls can land.
    pub settle_delay: Duration,
    pub min_body_len: usize,
}

impl Default for VisitOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(2),
            min_body_len: DEFAULT_MIN_BODY_LEN,
        }
    }
}

/// Drives one detail-page navigation and returns what the page fetched.
pub struct DetailVisitor {
    options: VisitOptions,
    interceptor: ResponseInterceptor,
}

impl DetailVisitor {
    pub fn new(options: VisitOptions) -> Self {
        let interceptor = ResponseInterceptor::new(options.min_body_len);
        Self {
            options,
            interceptor,
        }
    }

    /// Never fails: navigation problems come back as `bundle.error`.
    pub async fn visit(&mut self, page: &dyn BrowserPage, url: &str) -> CaptureBundle {
        info!("Visiting {}", url);

        if let Err(e) = self.interceptor.attach(page).await {
            warn!("Could not attach response listener for {}: {}", url, e);
            return CaptureBundle::with_error(url.to_string(), e.to_string());
        }

        if let Err(e) = page.goto(url, self.options.navigation_timeout).await {
            warn!("Error navigating to {}: {}", url, e);
            self.interceptor.abandon();
            return CaptureBundle::with_error(url.to_string(), e.to_string());
        }

        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }

        let raw = self.interceptor.detach().await;
        if raw.is_empty() {
            info!("No JSON responses found for {}", url);
        } else {
            info!("Captured {} JSON responses for {}", raw.len(), url);
        }

        let captured = raw
            .into_iter()
            .map(|r| CapturedResponse::decode(r.url, r.status, r.body))
            .collect();
        CaptureBundle::new(url.to_string(), captured)
    }
}

impl Default for DetailVisitor {
    fn default() -> Self {
        Self::new(VisitOptions::default())
    }
}
