//! Per-job byte budget shared by all items of one bulk download

use std::sync::atomic::{AtomicU64, Ordering};

/// Byte ceiling for one job; `None` means unlimited
#[derive(Debug)]
pub struct JobBudget {
    limit: Option<u64>,
    used: AtomicU64,
}

impl JobBudget {
    /// Budget with an optional ceiling
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Configured ceiling
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Bytes currently reserved
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    /// Whether `bytes` more would still fit
    pub fn fits(&self, bytes: u64) -> bool {
        self.limit
            .is_none_or(|limit| self.used().saturating_add(bytes) <= limit)
    }

    /// Start a reservation that is rolled back on drop unless committed
    pub fn reservation(&self) -> Reservation<'_> {
        Reservation {
            budget: self,
            bytes: 0,
            committed: false,
        }
    }

    fn try_reserve(&self, bytes: u64) -> Result<(), u64> {
        let Some(limit) = self.limit else {
            self.used.fetch_add(bytes, Ordering::SeqCst);
            return Ok(());
        };
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let next = used.checked_add(bytes)?;
                (next <= limit).then_some(next)
            })
            .map(|_| ())
            .map_err(|used| used.saturating_add(bytes))
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

/// Bytes held by one in-flight item
pub struct Reservation<'a> {
    budget: &'a JobBudget,
    bytes: u64,
    committed: bool,
}

impl Reservation<'_> {
    /// Ceiling of the underlying budget
    pub fn limit(&self) -> Option<u64> {
        self.budget.limit
    }

    /// Reserve `bytes` more; on overflow returns the total that would have been used
    pub fn grow(&mut self, bytes: u64) -> Result<(), u64> {
        self.budget.try_reserve(bytes)?;
        self.bytes += bytes;
        Ok(())
    }

    /// Keep the bytes counted against the job
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed && self.bytes > 0 {
            self.budget.release(self.bytes);
        }
    }
}
