//! In-memory browser backend with canned pages
//!
//! Serves fixed HTML per URL, records launches/opens/closes, and can be told
//! to fail launches, resets, or the first N navigations of a URL. Used by the
//! crate's own tests and handy for embedding applications' tests.
//!
//! ```
//! use media_harvest::browser::testing::ScriptedBrowser;
//!
//! let browser = ScriptedBrowser::new()
//!     .with_page("https://example.com/", r#"<img src="/cat.png">"#)
//!     .with_status("https://example.com/gone", 404);
//! assert_eq!(browser.launches(), 0);
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{BrowserLauncher, BrowserPage, BrowserSession, Navigation};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
struct ScriptedSite {
    html: String,
    status: Option<u16>,
    network_media: Vec<String>,
}

#[derive(Default)]
struct Shared {
    sites: HashMap<String, ScriptedSite>,
    /// Remaining transient navigation failures per URL
    flaky: Mutex<HashMap<String, u32>>,
    navigations: Mutex<Vec<String>>,
    launch_delay: Duration,
    navigation_delay: Duration,
    fail_launches: AtomicBool,
    fail_resets: AtomicBool,
    launches: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    sessions_closed: AtomicUsize,
    next_page: AtomicU64,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
}

/// Scripted [`BrowserLauncher`]; clones share state and counters
#[derive(Clone, Default)]
pub struct ScriptedBrowser {
    shared: Arc<Shared>,
}

impl ScriptedBrowser {
    /// Backend with no pages; unknown URLs answer 404
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, f: impl FnOnce(&mut Shared)) -> Self {
        // Builders run before the backend is shared.
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            f(shared);
        } else {
            tracing::warn!("scripted browser configured after it was shared; ignoring");
        }
        self
    }

    /// Serve `html` with status 200 at `url`
    pub fn with_page(self, url: &str, html: &str) -> Self {
        let url = url.to_string();
        let html = html.to_string();
        self.configure(move |s| {
            let site = s.sites.entry(url).or_default();
            site.html = html;
            site.status.get_or_insert(200);
        })
    }

    /// Answer `url` with the given status
    pub fn with_status(self, url: &str, status: u16) -> Self {
        let url = url.to_string();
        self.configure(move |s| {
            s.sites.entry(url).or_default().status = Some(status);
        })
    }

    /// Media URLs reported as network traffic when `url` is loaded
    pub fn with_network_media(self, url: &str, media: &[&str]) -> Self {
        let url = url.to_string();
        let media: Vec<String> = media.iter().map(|m| m.to_string()).collect();
        self.configure(move |s| {
            let site = s.sites.entry(url).or_default();
            site.status.get_or_insert(200);
            site.network_media = media;
        })
    }

    /// Fail the first `failures` navigations to `url` with a transient error
    pub fn with_flaky_navigation(self, url: &str, failures: u32) -> Self {
        let url = url.to_string();
        self.configure(move |s| {
            s.flaky
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url, failures);
        })
    }

    /// Delay every session launch
    pub fn with_launch_delay(self, delay: Duration) -> Self {
        self.configure(move |s| s.launch_delay = delay)
    }

    /// Delay every navigation
    pub fn with_navigation_delay(self, delay: Duration) -> Self {
        self.configure(move |s| s.navigation_delay = delay)
    }

    /// Make subsequent launches fail
    pub fn fail_launches(&self, fail: bool) {
        self.shared.fail_launches.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent page resets fail
    pub fn fail_resets(&self, fail: bool) {
        self.shared.fail_resets.store(fail, Ordering::SeqCst);
    }

    /// Mark every session launched so far as dead
    pub fn kill_sessions(&self) {
        let sessions = self
            .shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for session in sessions.iter() {
            session.alive.store(false, Ordering::SeqCst);
        }
    }

    /// Sessions launched
    pub fn launches(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    /// Pages opened across all sessions
    pub fn pages_opened(&self) -> usize {
        self.shared.pages_opened.load(Ordering::SeqCst)
    }

    /// Pages closed across all sessions
    pub fn pages_closed(&self) -> usize {
        self.shared.pages_closed.load(Ordering::SeqCst)
    }

    /// Sessions closed
    pub fn sessions_closed(&self) -> usize {
        self.shared.sessions_closed.load(Ordering::SeqCst)
    }

    /// Every navigation attempt, in order
    pub fn navigations(&self) -> Vec<String> {
        self.shared
            .navigations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedBrowser {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>> {
        if !self.shared.launch_delay.is_zero() {
            tokio::time::sleep(self.shared.launch_delay).await;
        }
        if self.shared.fail_launches.load(Ordering::SeqCst) {
            return Err(Error::Browser("scripted launch failure".into()));
        }
        self.shared.launches.fetch_add(1, Ordering::SeqCst);

        let session = Arc::new(ScriptedSession {
            shared: self.shared.clone(),
            alive: AtomicBool::new(true),
        });
        self.shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
        Ok(session)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedSession {
    shared: Arc<Shared>,
    alive: AtomicBool,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>> {
        if !self.is_alive() {
            return Err(Error::Browser("session is closed".into()));
        }
        self.shared.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedPage {
            id: self.shared.next_page.fetch_add(1, Ordering::SeqCst),
            shared: self.shared.clone(),
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.shared.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedPage {
    id: u64,
    shared: Arc<Shared>,
    current: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl ScriptedPage {
    fn current_site(&self) -> Option<ScriptedSite> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .and_then(|url| self.shared.sites.get(url).cloned())
    }
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<Navigation> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Browser(format!("page {} is closed", self.id)));
        }
        self.shared
            .navigations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        if !self.shared.navigation_delay.is_zero() {
            if self.shared.navigation_delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(Error::Browser(format!("navigation timed out after {timeout:?}")));
            }
            tokio::time::sleep(self.shared.navigation_delay).await;
        }

        {
            let mut flaky = self.shared.flaky.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(remaining) = flaky.get_mut(url)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(Error::Browser("net::ERR_CONNECTION_RESET".into()));
            }
        }

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());
        let status = self
            .shared
            .sites
            .get(url)
            .and_then(|site| site.status)
            .unwrap_or(404);

        Ok(Navigation {
            status: Some(status),
            final_url: Some(url.to_string()),
        })
    }

    async fn content(&self) -> Result<String> {
        Ok(self
            .current_site()
            .map(|site| site.html)
            .unwrap_or_else(|| "<html><head></head><body></body></html>".to_string()))
    }

    async fn network_media_urls(&self) -> Vec<String> {
        self.current_site()
            .map(|site| site.network_media)
            .unwrap_or_default()
    }

    async fn reset(&self) -> Result<()> {
        if self.shared.fail_resets.load(Ordering::SeqCst) {
            return Err(Error::Browser("scripted reset failure".into()));
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.pages_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
