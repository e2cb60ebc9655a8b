//! Bounded pool of browser sessions and leased pages.
//!
//! Acquisition order: reuse an idle page, open a page on a session with spare
//! capacity, launch a new session while below `max_sessions`, otherwise wait
//! for a release until `acquire_timeout` elapses.
//!
//! Session launches and page opens run in spawned tasks so that a caller
//! timing out never cancels a resource mid-creation; whatever finishes late
//! is parked as idle capacity for the next caller.
//!
//! Every page moves through `Idle -> Leased -> Released -> (Idle | Discarded)`.
//! A discarded page is closed and its id is never handed out again.
//!
//! A session whose engine died keeps its slot until its last lease comes
//! back, so leases never outnumber `max_sessions * max_pages_per_session`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;

use super::{BrowserLauncher, BrowserPage, BrowserSession};
use crate::config::PoolConfig;
use crate::error::{Error, Result};

/// Upper bound on a single page reset before the page is treated as broken
const RESET_TIMEOUT: Duration = Duration::from_secs(10);

/// Lease state of a page
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    /// Available for acquisition
    Idle,
    /// Held by exactly one caller
    Leased,
    /// Returned by its holder, reset in progress
    Released,
    /// Closed after a failed reset or dead session; terminal
    Discarded,
}

/// Point-in-time pool counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Live sessions
    pub sessions: usize,
    /// Idle pages ready for reuse
    pub available: usize,
    /// Pages leased or being reset
    pub busy: usize,
    /// Whether a session launch is in flight
    pub launching: bool,
    /// Pages discarded since the pool was created
    pub discarded_total: u64,
    /// Sessions launched since the pool was created
    pub sessions_launched_total: u64,
}

/// Exclusive lease on one page
///
/// Hand it back through [`ResourcePool::release`]. A handle dropped without
/// release (a panicking caller, a cancelled task) is released in the
/// background, or discarded when no runtime is available.
pub struct PageHandle {
    id: u64,
    session_id: u64,
    generation: u64,
    page: Arc<dyn BrowserPage>,
    pool: Weak<PoolInner>,
    returned: bool,
    /// Second chance after a dropped lease; dropping again discards
    orphaned: bool,
}

impl PageHandle {
    /// Pool-unique page id (never reused)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Session hosting this page
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// The leased page
    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        let Some(inner) = self.pool.upgrade() else {
            return;
        };
        let pool = ResourcePool { inner };
        tracing::warn!(page_id = self.id, "page lease dropped without release");

        if !self.orphaned
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            let orphan = PageHandle {
                id: self.id,
                session_id: self.session_id,
                generation: self.generation,
                page: self.page.clone(),
                pool: self.pool.clone(),
                returned: false,
                orphaned: true,
            };
            runtime.spawn(async move { pool.release(orphan).await });
        } else {
            pool.discard_abandoned(self.id, self.generation);
        }
    }
}

impl std::fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("generation", &self.generation)
            .finish()
    }
}

struct SessionEntry {
    id: u64,
    session: Arc<dyn BrowserSession>,
    /// Open pages plus pages being opened
    pages: usize,
    /// Engine died; waiting for leased pages to come back
    draining: bool,
    created_at: DateTime<Utc>,
}

struct PageSlot {
    session_id: u64,
    page: Arc<dyn BrowserPage>,
    state: LeaseState,
}

#[derive(Default)]
struct PoolState {
    generation: u64,
    next_id: u64,
    sessions: Vec<SessionEntry>,
    pages: HashMap<u64, PageSlot>,
    available: VecDeque<u64>,
    launching: bool,
    discarded_total: u64,
    sessions_launched_total: u64,
}

impl PoolState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn session_alive(&self, session_id: u64) -> bool {
        self.sessions
            .iter()
            .any(|s| s.id == session_id && s.session.is_alive())
    }

    /// Remove a page slot and give its capacity back to the owning session
    fn discard(&mut self, page_id: u64) -> Option<Arc<dyn BrowserPage>> {
        let slot = self.pages.remove(&page_id)?;
        self.available.retain(|id| *id != page_id);
        if let Some(entry) = self.sessions.iter_mut().find(|s| s.id == slot.session_id) {
            entry.pages = entry.pages.saturating_sub(1);
        }
        self.discarded_total += 1;
        Some(slot.page)
    }
}

/// Resources that must be closed outside the state lock
#[derive(Default)]
struct Retired {
    pages: Vec<Arc<dyn BrowserPage>>,
    sessions: Vec<Arc<dyn BrowserSession>>,
}

impl Retired {
    fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.sessions.is_empty()
    }

    async fn close_all(self) {
        for page in self.pages {
            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "failed to close retired page");
            }
        }
        for session in self.sessions {
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "failed to close retired browser session");
            }
        }
    }
}

enum Plan {
    Ready(PageHandle),
    OpenPage {
        session_id: u64,
        session: Arc<dyn BrowserSession>,
        generation: u64,
    },
    Launch {
        generation: u64,
    },
    Wait,
}

struct PoolInner {
    launcher: Arc<dyn BrowserLauncher>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    changed: Notify,
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn new_handle(
    inner: &Arc<PoolInner>,
    id: u64,
    session_id: u64,
    generation: u64,
    page: Arc<dyn BrowserPage>,
) -> PageHandle {
    PageHandle {
        id,
        session_id,
        generation,
        page,
        pool: Arc::downgrade(inner),
        returned: false,
        orphaned: false,
    }
}

/// Bounded pool of browser sessions handing out exclusive page leases
///
/// Cheap to clone; all clones share the same sessions.
#[derive(Clone)]
pub struct ResourcePool {
    inner: Arc<PoolInner>,
}

impl ResourcePool {
    /// Create an empty pool; the first session is launched lazily
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                launcher,
                config,
                state: Mutex::new(PoolState::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Lease a page, waiting up to `acquire_timeout` for capacity
    pub async fn acquire(&self) -> Result<PageHandle> {
        let started = Instant::now();
        let deadline = started + self.inner.config.acquire_timeout;

        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (plan, retired) = {
                let mut state = self.inner.lock_state();
                self.plan(&mut state)
            };
            if !retired.is_empty() {
                tokio::spawn(retired.close_all());
            }

            match plan {
                Plan::Ready(handle) => {
                    tracing::debug!(page_id = handle.id, "reusing idle page");
                    return Ok(handle);
                }
                Plan::OpenPage {
                    session_id,
                    session,
                    generation,
                } => {
                    let (tx, rx) = oneshot::channel();
                    tokio::spawn(self.clone().open_page(session_id, session, generation, tx));

                    match tokio::time::timeout_at(deadline, rx).await {
                        Ok(Ok(Ok(handle))) => return Ok(handle),
                        Ok(Ok(Err(e))) => return Err(e),
                        Ok(Err(_)) => {
                            return Err(Error::Browser("page open task aborted".into()));
                        }
                        Err(_) => return Err(timeout_error(started)),
                    }
                }
                Plan::Launch { generation } => {
                    let (tx, rx) = oneshot::channel();
                    tokio::spawn(self.clone().launch_session(generation, tx));

                    match tokio::time::timeout_at(deadline, rx).await {
                        // Session registered; loop to open a page on it.
                        Ok(Ok(Ok(()))) => {}
                        Ok(Ok(Err(e))) => return Err(e),
                        Ok(Err(_)) => {
                            return Err(Error::Browser("session launch task aborted".into()));
                        }
                        Err(_) => return Err(timeout_error(started)),
                    }
                }
                Plan::Wait => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        tracing::warn!(
                            waited_ms = started.elapsed().as_millis() as u64,
                            "browser pool exhausted"
                        );
                        return Err(timeout_error(started));
                    }
                }
            }
        }
    }

    /// Decide the next acquisition step; runs entirely under the state lock
    fn plan(&self, state: &mut PoolState) -> (Plan, Retired) {
        let mut retired = Retired::default();

        // Cull sessions whose engine died. Idle pages go at once; the session
        // keeps its slot until every outstanding lease has been released.
        let dead: Vec<u64> = state
            .sessions
            .iter()
            .filter(|s| !s.session.is_alive())
            .map(|s| s.id)
            .collect();
        for session_id in dead {
            let idle: Vec<u64> = state
                .pages
                .iter()
                .filter(|(_, slot)| slot.session_id == session_id && slot.state == LeaseState::Idle)
                .map(|(id, _)| *id)
                .collect();
            for page_id in idle {
                if let Some(page) = state.discard(page_id) {
                    retired.pages.push(page);
                }
            }
            let Some(pos) = state.sessions.iter().position(|s| s.id == session_id) else {
                continue;
            };
            let entry = &mut state.sessions[pos];
            if entry.pages == 0 {
                tracing::warn!(session_id, "browser session died, removing from pool");
                let entry = state.sessions.remove(pos);
                retired.sessions.push(entry.session);
            } else if !entry.draining {
                entry.draining = true;
                tracing::warn!(
                    session_id,
                    leased = entry.pages,
                    "browser session died, draining outstanding leases"
                );
            }
        }

        while let Some(page_id) = state.available.pop_front() {
            let generation = state.generation;
            if let Some(slot) = state.pages.get_mut(&page_id)
                && slot.state == LeaseState::Idle
            {
                slot.state = LeaseState::Leased;
                let handle = new_handle(
                    &self.inner,
                    page_id,
                    slot.session_id,
                    generation,
                    slot.page.clone(),
                );
                return (Plan::Ready(handle), retired);
            }
        }

        let max_pages = self.inner.config.max_pages_per_session;
        if let Some(entry) = state
            .sessions
            .iter_mut()
            .find(|s| !s.draining && s.pages < max_pages)
        {
            entry.pages += 1;
            let plan = Plan::OpenPage {
                session_id: entry.id,
                session: entry.session.clone(),
                generation: state.generation,
            };
            return (plan, retired);
        }

        if !state.launching && state.sessions.len() < self.inner.config.max_sessions {
            state.launching = true;
            return (
                Plan::Launch {
                    generation: state.generation,
                },
                retired,
            );
        }

        (Plan::Wait, retired)
    }

    async fn launch_session(self, generation: u64, tx: oneshot::Sender<Result<()>>) {
        let launcher_name = self.inner.launcher.name().to_string();
        tracing::info!(launcher = %launcher_name, "launching browser session");

        let mut result = self.inner.launcher.launch().await;

        let stale = {
            let mut state = self.inner.lock_state();
            if state.generation != generation {
                // Pool was shut down meanwhile; the new shutdown owns the flag.
                let stale = result.as_ref().ok().cloned();
                if stale.is_some() {
                    result = Err(Error::Browser("pool shut down during session launch".into()));
                }
                stale
            } else {
                state.launching = false;
                match &result {
                    Ok(session) => {
                        let id = state.allocate_id();
                        state.sessions.push(SessionEntry {
                            id,
                            session: session.clone(),
                            pages: 0,
                            draining: false,
                            created_at: Utc::now(),
                        });
                        state.sessions_launched_total += 1;
                        tracing::info!(
                            session_id = id,
                            sessions = state.sessions.len(),
                            "browser session ready"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, launcher = %launcher_name, "browser launch failed");
                    }
                }
                None
            }
        };

        if let Some(session) = stale {
            tracing::info!("discarding session launched across a pool shutdown");
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "failed to close stale session");
            }
        }

        self.inner.changed.notify_waiters();
        // Initiator may have timed out already.
        let _ = tx.send(result.map(|_| ()));
    }

    async fn open_page(
        self,
        session_id: u64,
        session: Arc<dyn BrowserSession>,
        generation: u64,
        tx: oneshot::Sender<Result<PageHandle>>,
    ) {
        let result = session.new_page().await;

        let outcome = {
            let mut state = self.inner.lock_state();
            let current = state.generation == generation;
            match result {
                Ok(page) if current => {
                    let id = state.allocate_id();
                    state.pages.insert(
                        id,
                        PageSlot {
                            session_id,
                            page: page.clone(),
                            state: LeaseState::Leased,
                        },
                    );
                    Ok(new_handle(&self.inner, id, session_id, generation, page))
                }
                Ok(page) => Err((
                    Error::Browser("pool shut down while opening page".into()),
                    Some(page),
                )),
                Err(e) => {
                    if current
                        && let Some(entry) = state.sessions.iter_mut().find(|s| s.id == session_id)
                    {
                        entry.pages = entry.pages.saturating_sub(1);
                    }
                    Err((e, None))
                }
            }
        };

        match outcome {
            Ok(handle) => {
                tracing::debug!(page_id = handle.id, session_id, "opened new page");
                if let Err(Ok(orphan)) = tx.send(Ok(handle)) {
                    // Caller timed out; park the page for the next acquisition.
                    self.park_idle(orphan);
                }
            }
            Err((e, page)) => {
                if let Some(page) = page
                    && let Err(close_err) = page.close().await
                {
                    tracing::debug!(error = %close_err, "failed to close orphaned page");
                }
                tracing::warn!(session_id, error = %e, "failed to open page");
                let _ = tx.send(Err(e));
            }
        }

        self.inner.changed.notify_waiters();
    }

    fn park_idle(&self, mut handle: PageHandle) {
        handle.returned = true;
        let mut state = self.inner.lock_state();
        if state.generation == handle.generation
            && let Some(slot) = state.pages.get_mut(&handle.id)
        {
            slot.state = LeaseState::Idle;
            state.available.push_back(handle.id);
        }
    }

    /// Return a leased page; it is reset and recirculated, or discarded if the reset fails
    pub async fn release(&self, mut handle: PageHandle) {
        handle.returned = true;
        let current = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;
            match state.pages.get_mut(&handle.id) {
                Some(slot) if state.generation == handle.generation => {
                    if slot.state == LeaseState::Leased {
                        slot.state = LeaseState::Released;
                        true
                    } else {
                        tracing::warn!(page_id = handle.id, state = ?slot.state, "release of page that is not leased");
                        return;
                    }
                }
                _ => false,
            }
        };

        if !current {
            // Pool was shut down after this lease was handed out.
            if let Err(e) = handle.page.close().await {
                tracing::debug!(page_id = handle.id, error = %e, "failed to close stale page");
            }
            return;
        }

        let reset = tokio::time::timeout(RESET_TIMEOUT, handle.page.reset()).await;
        let reset_error = match reset {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("reset timed out after {:?}", RESET_TIMEOUT)),
        };

        let discarded = {
            let mut state = self.inner.lock_state();
            let recirculate = reset_error.is_none()
                && state.generation == handle.generation
                && state.session_alive(handle.session_id);

            if recirculate {
                if let Some(slot) = state.pages.get_mut(&handle.id) {
                    slot.state = LeaseState::Idle;
                    state.available.push_back(handle.id);
                }
                None
            } else if state.generation == handle.generation {
                state.discard(handle.id)
            } else {
                Some(handle.page.clone())
            }
        };

        if let Some(page) = discarded {
            tracing::warn!(
                page_id = handle.id,
                reason = reset_error.as_deref().unwrap_or("session unavailable"),
                "discarding page"
            );
            if let Err(e) = page.close().await {
                tracing::debug!(page_id = handle.id, error = %e, "failed to close discarded page");
            }
        }

        self.inner.changed.notify_waiters();
    }

    /// Drop a lease whose holder vanished without releasing it
    fn discard_abandoned(&self, page_id: u64, generation: u64) {
        {
            let mut state = self.inner.lock_state();
            if state.generation == generation && state.discard(page_id).is_some() {
                tracing::warn!(page_id, "discarded abandoned page");
            }
        }
        self.inner.changed.notify_waiters();
    }

    /// Current lease state of a page id, `Discarded` once it left the pool
    pub fn lease_state(&self, page_id: u64) -> LeaseState {
        let state = self.inner.lock_state();
        state
            .pages
            .get(&page_id)
            .map(|slot| slot.state)
            .unwrap_or(LeaseState::Discarded)
    }

    /// Snapshot of pool counters
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        let available = state
            .pages
            .values()
            .filter(|slot| slot.state == LeaseState::Idle)
            .count();
        PoolStats {
            sessions: state.sessions.len(),
            available,
            busy: state.pages.len() - available,
            launching: state.launching,
            discarded_total: state.discarded_total,
            sessions_launched_total: state.sessions_launched_total,
        }
    }

    /// Close every page and session and reset to an empty pool
    ///
    /// Leases outstanding at shutdown are closed when released. A later
    /// `acquire` bootstraps a fresh session.
    pub async fn shutdown(&self) {
        let retired = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            state.launching = false;
            state.available.clear();

            let mut retired = Retired::default();
            for (_, slot) in state.pages.drain() {
                retired.pages.push(slot.page);
            }
            for entry in state.sessions.drain(..) {
                tracing::debug!(
                    session_id = entry.id,
                    age_secs = (Utc::now() - entry.created_at).num_seconds(),
                    "closing browser session"
                );
                retired.sessions.push(entry.session);
            }
            retired
        };

        tracing::info!(
            pages = retired.pages.len(),
            sessions = retired.sessions.len(),
            "shutting down browser pool"
        );
        retired.close_all().await;
        self.inner.changed.notify_waiters();
    }
}

fn timeout_error(started: Instant) -> Error {
    Error::PoolTimeout {
        waited_ms: started.elapsed().as_millis() as u64,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::ScriptedBrowser;

    fn pool_config(max_sessions: usize, max_pages: usize, timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            max_sessions,
            max_pages_per_session: max_pages,
            acquire_timeout: Duration::from_millis(timeout_ms),
            navigation_timeout: Duration::from_secs(5),
        }
    }

    fn pool_with(browser: &ScriptedBrowser, config: PoolConfig) -> ResourcePool {
        ResourcePool::new(Arc::new(browser.clone()), config)
    }

    #[tokio::test]
    async fn first_acquire_launches_one_session() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(2, 2, 1_000));

        let handle = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.available, 0);
        assert_eq!(browser.launches(), 1);

        pool.release(handle).await;
        let stats = pool.stats();
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.available, 1);
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_launch() {
        let browser = ScriptedBrowser::new().with_launch_delay(Duration::from_millis(50));
        let pool = pool_with(&browser, pool_config(3, 4, 2_000));

        let handles = futures::future::join_all((0..4).map(|_| pool.acquire())).await;
        let handles: Vec<_> = handles.into_iter().map(|h| h.unwrap()).collect();

        assert_eq!(browser.launches(), 1, "four pages fit on one session");
        assert_eq!(pool.stats().busy, 4);
        for handle in handles {
            pool.release(handle).await;
        }
    }

    #[tokio::test]
    async fn released_page_is_reused() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(1, 1, 1_000));

        let first = pool.acquire().await.unwrap();
        let first_id = first.id();
        pool.release(first).await;

        let second = pool.acquire().await.unwrap();
        assert_eq!(second.id(), first_id);
        assert_eq!(browser.pages_opened(), 1);
        assert_eq!(pool.lease_state(first_id), LeaseState::Leased);
        pool.release(second).await;
        assert_eq!(pool.lease_state(first_id), LeaseState::Idle);
    }

    #[tokio::test]
    async fn busy_pages_never_exceed_capacity() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(2, 2, 100));

        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.acquire().await.unwrap());
            assert!(pool.stats().busy <= 4);
        }
        assert_eq!(pool.stats().sessions, 2);

        let overflow = pool.acquire().await;
        assert!(matches!(overflow, Err(Error::PoolTimeout { .. })));
        assert_eq!(pool.stats().busy, 4);

        for handle in held {
            pool.release(handle).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_times_out_instead_of_hanging() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(1, 1, 500));

        let held = pool.acquire().await.unwrap();
        let started = Instant::now();
        let result = pool.acquire().await;

        match result {
            Err(Error::PoolTimeout { waited_ms }) => assert!(waited_ms >= 500),
            other => panic!("expected PoolTimeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(500));
        pool.release(held).await;
    }

    #[tokio::test]
    async fn waiter_is_woken_by_release() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(1, 1, 2_000));

        let held = pool.acquire().await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.release(held).await;

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.id(), held_id);
        pool.release(handle).await;
    }

    #[tokio::test]
    async fn failed_reset_discards_page_for_good() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(1, 2, 1_000));

        let broken = pool.acquire().await.unwrap();
        let broken_id = broken.id();

        browser.fail_resets(true);
        pool.release(broken).await;
        browser.fail_resets(false);

        assert_eq!(pool.lease_state(broken_id), LeaseState::Discarded);
        assert_eq!(pool.stats().discarded_total, 1);
        assert_eq!(browser.pages_closed(), 1);

        for _ in 0..3 {
            let handle = pool.acquire().await.unwrap();
            assert_ne!(handle.id(), broken_id, "discarded page resurfaced");
            pool.release(handle).await;
        }
    }

    #[tokio::test]
    async fn dead_session_is_replaced() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(1, 1, 1_000));

        let handle = pool.acquire().await.unwrap();
        let old_id = handle.id();
        browser.kill_sessions();
        pool.release(handle).await;
        assert_eq!(pool.lease_state(old_id), LeaseState::Discarded);

        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.id(), old_id);
        assert_eq!(browser.launches(), 2);
        pool.release(fresh).await;
    }

    #[tokio::test]
    async fn dead_session_holds_its_slot_until_leases_return() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(1, 1, 100));

        let held = pool.acquire().await.unwrap();
        browser.kill_sessions();

        let overflow = pool.acquire().await;
        assert!(matches!(overflow, Err(Error::PoolTimeout { .. })));
        assert_eq!(pool.stats().busy, 1);
        assert_eq!(browser.launches(), 1);

        let held_id = held.id();
        pool.release(held).await;
        assert_eq!(pool.lease_state(held_id), LeaseState::Discarded);

        let fresh = pool.acquire().await.unwrap();
        assert_eq!(browser.launches(), 2);
        assert_eq!(pool.stats().sessions, 1);
        pool.release(fresh).await;
    }

    #[tokio::test]
    async fn dropped_lease_returns_to_the_pool() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(1, 1, 1_000));

        let lost = pool.acquire().await.unwrap();
        let lost_id = lost.id();
        drop(lost);

        let handle = pool.acquire().await.unwrap();
        assert_eq!(handle.id(), lost_id);
        assert_eq!(browser.pages_opened(), 1);
        pool.release(handle).await;
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn lease_dropped_outside_runtime_is_discarded() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(1, 1, 1_000));

        let lost = pool.acquire().await.unwrap();
        let lost_id = lost.id();
        std::thread::spawn(move || drop(lost)).join().unwrap();

        assert_eq!(pool.lease_state(lost_id), LeaseState::Discarded);
        assert_eq!(pool.stats().busy, 0);
        let handle = pool.acquire().await.unwrap();
        assert_ne!(handle.id(), lost_id);
        pool.release(handle).await;
    }

    #[tokio::test]
    async fn shutdown_closes_everything_and_allows_rebootstrap() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, pool_config(2, 1, 1_000));

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a).await;

        pool.shutdown().await;
        assert_eq!(pool.stats(), PoolStats {
            discarded_total: 0,
            sessions_launched_total: 2,
            ..Default::default()
        });
        assert_eq!(browser.sessions_closed(), 2);

        // Lease that outlived the shutdown is closed, not recirculated.
        pool.release(b).await;
        assert_eq!(pool.stats().available, 0);

        let again = pool.acquire().await.unwrap();
        assert_eq!(browser.launches(), 3);
        pool.release(again).await;
    }

    #[tokio::test]
    async fn launch_failure_is_returned_to_the_initiator() {
        let browser = ScriptedBrowser::new();
        browser.fail_launches(true);
        let pool = pool_with(&browser, pool_config(1, 1, 1_000));

        let result = pool.acquire().await;
        assert!(matches!(result, Err(Error::Browser(_))));
        assert!(!pool.stats().launching);
        assert_eq!(pool.stats().sessions, 0);

        browser.fail_launches(false);
        let handle = pool.acquire().await.unwrap();
        pool.release(handle).await;
    }
}
