use crate::extract::MetadataExtractor;
use crate::frontier::{Frontier, FrontierError};
use oogst_scanner::browser::BrowserPage;
use oogst_scanner::error::ScanError;
use oogst_scanner::paginator::SearchPaginator;
use oogst_scanner::visitor::DetailVisitor;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error(transparent)]
    Frontier(#[from] FrontierError),

    #[error("Search page {page} failed after {attempts} attempt(s): {source}")]
    SearchPage {
        page: u32,
        attempts: u32,
        source: ScanError,
    },
}

/// Callback for reporting harvest progress
pub type HarvestProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Shared stop flag. Loops finish the unit in flight, then return.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for code that polls an `AtomicBool` directly.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Fixed delay between navigations.
    pub pace: Duration,
    /// Extra attempts for a search page whose navigation failed.
    pub max_retries: u32,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            pace: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverReport {
    pub pages_visited: u32,
    pub links_found: usize,
    pub new_urls: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub attempted: usize,
    pub processed: usize,
    pub visit_errors: usize,
    pub storage_errors: usize,
}

/// How the process loop picks its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Plain read of Discovered entries. Only safe with a single worker.
    Next { limit: Option<usize> },
    /// Lease entries so several workers can share one store.
    Claim { limit: usize, lease: Duration },
}

/// Drives the discover and process loops against one frontier.
pub struct Harvester {
    frontier: Arc<Frontier>,
    extractor: MetadataExtractor,
    options: HarvestOptions,
    shutdown: ShutdownSignal,
    progress_callback: Option<HarvestProgressCallback>,
}

impl Harvester {
    pub fn new(frontier: Arc<Frontier>, options: HarvestOptions) -> Self {
        Self {
            frontier,
            extractor: MetadataExtractor::new(),
            options,
            shutdown: ShutdownSignal::new(),
            progress_callback: None,
        }
    }

    pub fn with_extractor(mut self, extractor: MetadataExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress_callback(mut self, callback: HarvestProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    fn report_progress(&self, message: String) {
        if let Some(ref callback) = self.progress_callback {
            callback(message);
        }
    }

    async fn pace(&self) {
        if !self.options.pace.is_zero() {
            tokio::time::sleep(self.options.pace).await;
        }
    }

    /// Walk search pages from 1 until one has no detail links.
    pub async fn discover(
        &self,
        page: &dyn BrowserPage,
        paginator: &SearchPaginator,
        max_pages: Option<u32>,
    ) -> Result<DiscoverReport, HarvestError> {
        let mut report = DiscoverReport::default();
        let mut page_index = 1u32;

        loop {
            if max_pages.is_some_and(|max| page_index > max) {
                info!("Reached page limit of {}", page_index - 1);
                break;
            }
            if self.shutdown.is_requested() {
                info!("Shutdown requested, stopping discovery at page {}", page_index);
                break;
            }

            let Some(links) = self.collect_with_retries(page, paginator, page_index).await? else {
                info!("Shutdown requested, stopping discovery at page {}", page_index);
                break;
            };
            report.pages_visited += 1;

            if links.is_empty() {
                info!("No more results at page {}", page_index);
                break;
            }

            let created = self.frontier.insert(&links)?;
            report.links_found += links.len();
            report.new_urls += created;
            self.report_progress(format!(
                "Page {}: {} links, {} new",
                page_index,
                links.len(),
                created
            ));

            page_index += 1;
            self.pace().await;
        }

        info!(
            "Discovery finished: {} pages, {} links, {} new URLs",
            report.pages_visited, report.links_found, report.new_urls
        );
        Ok(report)
    }

    /// `None` when shutdown was requested while a failed page awaited its retry.
    async fn collect_with_retries(
        &self,
        page: &dyn BrowserPage,
        paginator: &SearchPaginator,
        page_index: u32,
    ) -> Result<Option<Vec<String>>, HarvestError> {
        let mut attempts = 0;
        loop {
            if attempts > 0 && self.shutdown.is_requested() {
                return Ok(None);
            }
            attempts += 1;
            match paginator.collect_links(page, page_index).await {
                Ok(links) => return Ok(Some(links)),
                Err(e) if e.is_retryable() && attempts <= self.options.max_retries => {
                    warn!(
                        "Search page {} failed (attempt {}): {}",
                        page_index, attempts, e
                    );
                    self.pace().await;
                }
                Err(source) => {
                    return Err(HarvestError::SearchPage {
                        page: page_index,
                        attempts,
                        source,
                    });
                }
            }
        }
    }

    /// Visit one batch of Discovered entries and mark each Processed.
    ///
    /// Visit failures still mark the entry, with the error in its capture and
    /// an empty record. Storage failures leave it Discovered for a later run.
    pub async fn process(
        &self,
        page: &dyn BrowserPage,
        visitor: &mut DetailVisitor,
        mode: BatchMode,
    ) -> Result<ProcessReport, HarvestError> {
        let batch = match mode {
            BatchMode::Next { limit } => self.frontier.next_batch(limit)?,
            BatchMode::Claim { limit, lease } => self.frontier.claim_batch(limit, lease)?,
        };

        let claimed = matches!(mode, BatchMode::Claim { .. });
        let mut report = ProcessReport::default();
        if batch.is_empty() {
            info!("No unprocessed URLs found");
            return Ok(report);
        }

        info!("Processing {} unprocessed URLs", batch.len());
        let total = batch.len();
        let mut unfinished: Vec<&str> = Vec::new();

        for (index, entry) in batch.iter().enumerate() {
            if self.shutdown.is_requested() {
                info!("Shutdown requested after {} of {} URLs", index, total);
                unfinished.extend(batch[index..].iter().map(|e| e.url.as_str()));
                break;
            }

            report.attempted += 1;
            let bundle = visitor.visit(page, &entry.url).await;
            if bundle.is_error() {
                report.visit_errors += 1;
            }
            let record = self.extractor.extract(&bundle);

            match self.frontier.mark_processed(&entry.url, &bundle, &record) {
                Ok(()) => {
                    report.processed += 1;
                    self.report_progress(format!(
                        "[{}/{}] {} ({} fields)",
                        index + 1,
                        total,
                        entry.url,
                        record.len()
                    ));
                }
                Err(e) => {
                    error!("Failed to store result for {}: {}", entry.url, e);
                    report.storage_errors += 1;
                    unfinished.push(&entry.url);
                }
            }

            if index + 1 < total {
                self.pace().await;
            }
        }

        if claimed && !unfinished.is_empty() {
            match self.frontier.release_claims(&unfinished) {
                Ok(released) => info!("Released {} unfinished claims", released),
                Err(e) => warn!("Failed to release {} claims: {}", unfinished.len(), e),
            }
        }

        info!(
            "Processed {} of {} URLs ({} visit errors, {} storage errors)",
            report.processed, report.attempted, report.visit_errors, report.storage_errors
        );
        Ok(report)
    }
}
