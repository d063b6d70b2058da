//! Expiry scheduler: one adjudication per pending booking at its hold expiry.
//!
//! The fire-at time lives on the booking itself (`expires_at`), so the
//! in-process timer index is only an accelerator. It can be rebuilt from the
//! store at any time with [`ExpiryScheduler::recover`], and the periodic sweep
//! catches anything a lost timer missed.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CacheService;
use crate::error::StoreError;
use crate::ledger::ExpireOutcome;
use crate::models::{BookingId, BookingStatus, SeatId};
use crate::store::BookingStore;

const STORE_RETRY_DELAY: Duration = Duration::from_secs(5);
const FIRE_CONCURRENCY: usize = 16;

/// Timers indexed by fire time, with a reverse map so each booking has at most one.
#[derive(Debug, Default)]
struct TimerIndex {
    by_fire: BTreeSet<(DateTime<Utc>, BookingId)>,
    by_booking: HashMap<BookingId, DateTime<Utc>>,
}

impl TimerIndex {
    fn insert(&mut self, id: BookingId, fire_at: DateTime<Utc>) {
        if let Some(previous) = self.by_booking.insert(id, fire_at) {
            self.by_fire.remove(&(previous, id));
        }
        self.by_fire.insert((fire_at, id));
    }

    fn remove(&mut self, id: BookingId) -> bool {
        match self.by_booking.remove(&id) {
            Some(fire_at) => self.by_fire.remove(&(fire_at, id)),
            None => false,
        }
    }

    fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.by_fire.first().map(|(at, _)| *at)
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<BookingId> {
        let mut due = Vec::new();
        while let Some(&(fire_at, id)) = self.by_fire.first() {
            if fire_at > now {
                break;
            }
            self.by_fire.pop_first();
            self.by_booking.remove(&id);
            due.push(id);
        }
        due
    }

    fn len(&self) -> usize {
        self.by_booking.len()
    }
}

/// Result of adjudicating one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Adjudication {
    Expired { released: Vec<SeatId> },
    /// Payment won the race; nothing was released.
    AlreadyPaid,
    AlreadySettled(BookingStatus),
    /// The hold window has not elapsed yet; the timer was re-armed.
    NotDue(DateTime<Utc>),
    NotFound,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub already_settled: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub armed_timers: usize,
    pub expired_total: u64,
    pub sweeps_run: u64,
}

struct Inner {
    store: Arc<dyn BookingStore>,
    cache: Option<CacheService>,
    timers: Mutex<TimerIndex>,
    wake: Notify,
    retry_delay: Duration,
    expired_total: AtomicU64,
    sweeps_run: AtomicU64,
}

#[derive(Clone)]
pub struct ExpiryScheduler {
    inner: Arc<Inner>,
}

impl ExpiryScheduler {
    pub fn new(store: Arc<dyn BookingStore>, cache: Option<CacheService>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                cache,
                timers: Mutex::new(TimerIndex::default()),
                wake: Notify::new(),
                retry_delay: STORE_RETRY_DELAY,
                expired_total: AtomicU64::new(0),
                sweeps_run: AtomicU64::new(0),
            }),
        }
    }

    fn timers(&self) -> std::sync::MutexGuard<'_, TimerIndex> {
        self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arms (or re-arms) the single timer of a booking.
    pub fn arm(&self, id: BookingId, fire_at: DateTime<Utc>) {
        self.timers().insert(id, fire_at);
        self.inner.wake.notify_one();
        debug!(booking_id = %id, %fire_at, "⏰ Hold timer armed");
    }

    pub fn disarm(&self, id: BookingId) -> bool {
        self.timers().remove(id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers().len()
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.timers().next_fire()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            armed_timers: self.armed_count(),
            expired_total: self.inner.expired_total.load(Ordering::Relaxed),
            sweeps_run: self.inner.sweeps_run.load(Ordering::Relaxed),
        }
    }

    /// Decides the fate of one booking as of `now`.
    ///
    /// A booking that is still pending past its `expires_at` is expired and its
    /// seats released in one store operation; the store re-checks the status in
    /// that same step, so a confirmation that wins the race leaves it untouched.
    pub async fn adjudicate(&self, id: BookingId, now: DateTime<Utc>) -> Result<Adjudication, StoreError> {
        let Some(booking) = self.inner.store.get_booking(id).await? else {
            self.disarm(id);
            return Ok(Adjudication::NotFound);
        };

        match booking.status {
            BookingStatus::Pending if booking.expires_at > now => {
                self.arm(id, booking.expires_at);
                return Ok(Adjudication::NotDue(booking.expires_at));
            }
            BookingStatus::Pending => {}
            BookingStatus::Paid => {
                self.disarm(id);
                debug!(booking_id = %id, "Booking already paid, nothing to release");
                return Ok(Adjudication::AlreadyPaid);
            }
            other => {
                self.disarm(id);
                return Ok(Adjudication::AlreadySettled(other));
            }
        }

        let outcome = self.inner.store.expire(id, now).await?;
        self.disarm(id);
        Ok(self.record_expiry(id, outcome).await)
    }

    /// Expires a pending hold immediately, regardless of its window.
    ///
    /// Used as the compensating action when no payment session could be
    /// opened for the booking.
    pub async fn abort_hold(&self, id: BookingId) -> Result<Adjudication, StoreError> {
        self.disarm(id);
        let outcome = self.inner.store.expire(id, Utc::now()).await?;
        Ok(self.record_expiry(id, outcome).await)
    }

    async fn record_expiry(&self, id: BookingId, outcome: ExpireOutcome) -> Adjudication {
        match outcome {
            ExpireOutcome::Expired { booking, released } => {
                self.inner.expired_total.fetch_add(1, Ordering::Relaxed);
                if let Some(cache) = &self.inner.cache {
                    cache.invalidate_seats(booking.event_id).await;
                }
                info!(
                    booking_id = %id,
                    event_id = %booking.event_id,
                    "🎫 Hold expired, {} seats released",
                    released.len()
                );
                Adjudication::Expired { released }
            }
            ExpireOutcome::AlreadyPaid(_) => {
                debug!(booking_id = %id, "Payment won the race, hold kept");
                Adjudication::AlreadyPaid
            }
            ExpireOutcome::AlreadySettled(booking) => Adjudication::AlreadySettled(booking.status),
            ExpireOutcome::NotFound => Adjudication::NotFound,
        }
    }

    /// Re-arms a timer for every pending booking from its durable `expires_at`.
    /// Overdue bookings fire on the next loop iteration.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let pending = self.inner.store.pending_bookings().await?;
        let count = pending.len();
        {
            let mut timers = self.timers();
            for booking in &pending {
                timers.insert(booking.id, booking.expires_at);
            }
        }
        self.inner.wake.notify_one();
        info!("⏰ Recovered {} pending hold timers", count);
        Ok(count)
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        self.sweep_at(Utc::now()).await
    }

    /// Adjudicates every pending booking whose window elapsed by `now`,
    /// whether or not a timer is armed for it.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        self.inner.sweeps_run.fetch_add(1, Ordering::Relaxed);
        let stale = self.inner.store.stale_pending(now).await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        if stale.is_empty() {
            debug!("🧹 No stale holds to sweep");
            return Ok(report);
        }

        info!("🧹 Found {} stale holds to sweep", stale.len());
        for id in stale {
            match self.adjudicate(id, now).await {
                Ok(Adjudication::Expired { .. }) => report.expired += 1,
                Ok(_) => report.already_settled += 1,
                Err(e) => {
                    error!(booking_id = %id, "🧹 Failed to expire stale hold: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            expired = report.expired,
            settled = report.already_settled,
            failed = report.failed,
            "✅ Sweep completed"
        );
        Ok(report)
    }

    async fn fire_due(&self, now: DateTime<Utc>) {
        let due = self.timers().pop_due(now);
        stream::iter(due)
            .for_each_concurrent(FIRE_CONCURRENCY, |id| async move {
                if let Err(e) = self.adjudicate(id, now).await {
                    let retry_at = now + chrono::Duration::from_std(self.inner.retry_delay).unwrap_or_default();
                    warn!(booking_id = %id, %retry_at, "Hold adjudication failed, retrying: {}", e);
                    self.arm(id, retry_at);
                }
            })
            .await;
    }

    /// Starts the timer loop. It sleeps until the earliest armed fire time
    /// and wakes early whenever a new timer is armed.
    pub fn spawn(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            info!("⏰ Expiry timer loop started");
            loop {
                match scheduler.next_fire() {
                    None => scheduler.inner.wake.notified().await,
                    Some(fire_at) => {
                        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        if !delay.is_zero() {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = scheduler.inner.wake.notified() => continue,
                            }
                        }
                        scheduler.fire_due(Utc::now()).await;
                    }
                }
            }
        })
    }

    /// Starts the periodic safety-net sweep.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.sweep().await {
                    error!("🧹 Periodic sweep failed: {}", e);
                }
            }
        })
    }
}
