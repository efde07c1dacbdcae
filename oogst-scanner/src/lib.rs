pub mod browser;
pub mod capture;
#[cfg(feature = "browser")]
pub mod chromium;
pub mod error;
pub mod interceptor;
pub mod paginator;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;
pub mod visitor;

pub use browser::{BrowserPage, ResponseEvent, ResponseSubscription};
pub use capture::{CaptureBundle, CapturedBody, CapturedResponse};
#[cfg(feature = "browser")]
pub use chromium::{ChromiumOptions, ChromiumPage, ChromiumSession};
pub use error::ScanError;
pub use interceptor::{RawCapture, ResponseInterceptor};
pub use paginator::{SearchOptions, SearchPaginator};
pub use visitor::{DetailVisitor, VisitOptions};
