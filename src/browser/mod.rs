//! Browser automation seams and the pooled page manager
//!
//! A [`BrowserLauncher`] starts heavyweight [`BrowserSession`]s; each session
//! hosts several [`BrowserPage`]s. The [`ResourcePool`] owns all of them and
//! hands out exclusive [`PageHandle`] leases.
//!
//! Implementations:
//! - [`testing::ScriptedBrowser`] - in-memory backend with canned pages
//! - `chromium::ChromiumLauncher` - headless Chrome (feature `chromium`)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

#[cfg(feature = "chromium")]
pub mod chromium;
mod pool;
pub mod testing;

pub use pool::{LeaseState, PageHandle, PoolStats, ResourcePool};

/// Outcome of a page navigation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Navigation {
    /// Main document status, when the backend can observe it
    pub status: Option<u16>,
    /// URL after redirects, when known
    pub final_url: Option<String>,
}

/// One interactive page inside a session
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Load `url` and wait for the document, failing after `timeout`
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<Navigation>;

    /// Serialized DOM of the currently loaded document
    async fn content(&self) -> Result<String>;

    /// Media URLs observed on the network since the last navigation
    async fn network_media_urls(&self) -> Vec<String> {
        Vec::new()
    }

    /// Return the page to a neutral state (blank document, cleared storage)
    async fn reset(&self) -> Result<()>;

    /// Close the page and release its backend resources
    async fn close(&self) -> Result<()>;
}

/// One running automation-engine instance
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a new blank page
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>>;

    /// Whether the engine process is still usable
    fn is_alive(&self) -> bool;

    /// Terminate the engine
    async fn close(&self) -> Result<()>;
}

/// Factory for browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a new session
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>>;

    /// Human-readable name for logging
    fn name(&self) -> &str;
}
