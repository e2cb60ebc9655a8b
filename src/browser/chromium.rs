//! Headless Chrome backend built on chromiumoxide

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, EventResponseReceived};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{BrowserLauncher, BrowserPage, BrowserSession, Navigation};
use crate::error::{Error, Result};

const CLEAR_STORAGE_JS: &str =
    "try { localStorage.clear(); sessionStorage.clear(); } catch (e) {} true";

fn browser_err(e: impl std::fmt::Display) -> Error {
    Error::Browser(e.to_string())
}

/// Launches headless Chrome processes
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
    /// Run with a visible window
    pub headful: bool,
    /// Disable the Chrome sandbox (needed in most containers)
    pub no_sandbox: bool,
    /// Explicit browser executable, otherwise auto-detected
    pub executable: Option<std::path::PathBuf>,
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>> {
        let mut builder = BrowserConfig::builder();
        if self.headful {
            builder = builder.with_head();
        }
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(Error::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;

        let alive = Arc::new(AtomicBool::new(true));
        let handler_alive = alive.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "chromium handler event error");
                }
            }
            handler_alive.store(false, Ordering::SeqCst);
            tracing::warn!("chromium connection closed");
        });

        Ok(Arc::new(ChromiumSession {
            browser: tokio::sync::Mutex::new(browser),
            alive,
            handler_task,
        }))
    }

    fn name(&self) -> &str {
        "chromium"
    }
}

struct ChromiumSession {
    browser: tokio::sync::Mutex<Browser>,
    alive: Arc<AtomicBool>,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(browser_err)?;

        if let Err(e) = page.execute(EnableParams::default()).await {
            tracing::warn!(error = %e, "failed to enable network domain");
        }

        let responses = Arc::new(Mutex::new(Vec::new()));
        let listener = match page.event_listener::<EventResponseReceived>().await {
            Ok(mut events) => {
                let sink = responses.clone();
                Some(tokio::spawn(async move {
                    while let Some(event) = events.next().await {
                        sink.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(ObservedResponse {
                                url: event.response.url.clone(),
                                mime: event.response.mime_type.to_lowercase(),
                                status: event.response.status as u16,
                            });
                    }
                }))
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to subscribe to network responses");
                None
            }
        };

        Ok(Arc::new(ChromiumPage {
            page,
            responses,
            listener,
        }))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let result = browser.close().await.map(|_| ()).map_err(browser_err);
        if let Err(e) = browser.wait().await {
            tracing::debug!(error = %e, "chromium process did not exit cleanly");
        }
        self.handler_task.abort();
        self.alive.store(false, Ordering::SeqCst);
        result
    }
}

struct ObservedResponse {
    url: String,
    mime: String,
    status: u16,
}

struct ChromiumPage {
    page: Page,
    responses: Arc<Mutex<Vec<ObservedResponse>>>,
    listener: Option<JoinHandle<()>>,
}

impl ChromiumPage {
    fn clear_observed(&self) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<Navigation> {
        self.clear_observed();

        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| Error::Browser(format!("navigation timed out after {timeout:?}")))?
            .map_err(browser_err)?;

        let final_url = self.page.url().await.map_err(browser_err)?;
        let status = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.mime.starts_with("text/html") || r.mime.starts_with("application/xhtml+xml"))
            .map(|r| r.status);

        Ok(Navigation { status, final_url })
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.map_err(browser_err)
    }

    async fn network_media_urls(&self) -> Vec<String> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.mime.starts_with("image/") || r.mime.starts_with("video/"))
            .map(|r| r.url.clone())
            .collect()
    }

    async fn reset(&self) -> Result<()> {
        self.page
            .evaluate(CLEAR_STORAGE_JS)
            .await
            .map_err(browser_err)?;
        self.page.goto("about:blank").await.map_err(browser_err)?;
        self.clear_observed();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(listener) = &self.listener {
            listener.abort();
        }
        self.page.clone().close().await.map_err(browser_err)
    }
}
