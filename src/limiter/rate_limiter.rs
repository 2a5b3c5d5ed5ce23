// ABOUTME: Per-user token bucket rate limiter for request admission.
// ABOUTME: Buckets refill on an explicit tick, driven by a cancellable background loop.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ServiceConfig;

/// Per-user token bucket rate limiter.
///
/// Every user owns one bucket holding at most `capacity` tokens. Each admitted
/// request spends one token; [`tick`](Self::tick) adds `refill_amount` tokens
/// to every bucket, capped at capacity. Refill is never triggered by
/// consumption, so a drained user stays throttled until the next tick.
///
/// The bucket table is only write-locked to add buckets. Admission locks the
/// single bucket involved, so users never wait on each other.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Mutex<u64>>>>,
    capacity: u64,
    refill_amount: u64,
    refill_interval: Duration,
}

impl RateLimiter {
    /// Create a rate limiter.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum tokens per bucket. New buckets start full.
    /// * `refill_amount` - Tokens added to every bucket per tick.
    /// * `refill_interval` - Period of the background refill loop.
    pub fn new(capacity: u64, refill_amount: u64, refill_interval: Duration) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            capacity,
            refill_amount,
            refill_interval,
        }
    }

    /// Create a rate limiter sized from service configuration.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            config.bucket_capacity,
            config.refill_amount,
            config.refill_interval(),
        )
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    pub(super) async fn bucket(&self, user_id: &str) -> Option<Arc<Mutex<u64>>> {
        self.buckets.read().await.get(user_id).cloned()
    }

    /// Bucket for `user_id`, created full if missing.
    async fn bucket_or_full(&self, user_id: &str) -> Arc<Mutex<u64>> {
        if let Some(bucket) = self.bucket(user_id).await {
            return bucket;
        }
        self.buckets
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(self.capacity)))
            .clone()
    }

    /// Spend one token for `user_id`.
    ///
    /// Unknown users get a full bucket before the check. Returns `false`
    /// without touching state when the bucket is empty. The check and the
    /// decrement happen under the bucket's lock, so concurrent callers cannot
    /// both spend the last token.
    pub async fn try_consume(&self, user_id: &str) -> bool {
        let bucket = self.bucket_or_full(user_id).await;
        let mut tokens = bucket.lock().await;

        if *tokens == 0 {
            return false;
        }
        *tokens -= 1;
        true
    }

    /// Set a user's bucket to `tokens`, capped at capacity.
    ///
    /// Returns the stored token count.
    pub async fn seed(&self, user_id: &str, tokens: u64) -> u64 {
        let tokens = tokens.min(self.capacity);
        let bucket = self.bucket_or_full(user_id).await;
        *bucket.lock().await = tokens;
        tokens
    }

    /// Create a bucket holding `tokens`, capped at capacity, unless one exists.
    ///
    /// Returns the stored token count, or `None` if the user already had a
    /// bucket (which is left untouched).
    pub async fn try_seed(&self, user_id: &str, tokens: u64) -> Option<u64> {
        let tokens = tokens.min(self.capacity);
        match self.buckets.write().await.entry(user_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(tokens)));
                Some(tokens)
            }
        }
    }

    /// Current tokens for a user, or `None` if no bucket exists yet.
    pub async fn tokens(&self, user_id: &str) -> Option<u64> {
        let bucket = self.bucket(user_id).await?;
        let tokens = *bucket.lock().await;
        Some(tokens)
    }

    /// Refill every known bucket by `refill_amount`, never above capacity.
    ///
    /// Walks a snapshot of the table; buckets added mid-tick start full anyway.
    pub async fn tick(&self) {
        let buckets: Vec<_> = self.buckets.read().await.values().cloned().collect();
        for bucket in buckets {
            let mut tokens = bucket.lock().await;
            *tokens = tokens.saturating_add(self.refill_amount).min(self.capacity);
        }
    }

    /// Run [`tick`](Self::tick) every `refill_interval` until `cancel` completes.
    ///
    /// The first tick fires one full interval after the call.
    ///
    /// # Panics
    ///
    /// Panics if `refill_interval` is zero; [`ServiceConfig::validate`] rejects that.
    pub async fn run_refill<F>(&self, cancel: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let start = Instant::now() + self.refill_interval;
        let mut interval = tokio::time::interval_at(start, self.refill_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = &mut cancel => {
                    tracing::debug!("rate limiter refill loop stopped");
                    return;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
