// Rate-limit tracker for the futures venue. Same atomic-counter shape as
// the spot client's tracker; the hard ceiling is now derived from a
// configurable buffer (spec §5: "respects a rate-limit buffer (default 20%)
// by throttling when observed weight approaches the venue ceiling") instead
// of a fixed constant.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Binance USD-M futures caps request weight at 2400/min; we reserve
/// `buffer_pct` of it as headroom.
const VENUE_WEIGHT_CEILING: u32 = 2400;
const ORDER_10S_LIMIT: u32 = 300;
const ORDER_1D_LIMIT: u32 = 200_000;

pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    order_count_10s: AtomicU32,
    order_count_1d: AtomicU32,
    hard_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub order_count_10s: u32,
    pub order_count_1d: u32,
    pub hard_limit: u32,
}

impl RateLimitTracker {
    pub fn new(buffer_pct: f64) -> Self {
        let reserve = (VENUE_WEIGHT_CEILING as f64 * buffer_pct / 100.0).round() as u32;
        let hard_limit = VENUE_WEIGHT_CEILING.saturating_sub(reserve);
        Self {
            used_weight_1m: AtomicU32::new(0),
            order_count_10s: AtomicU32::new(0),
            order_count_1d: AtomicU32::new(0),
            hard_limit,
        }
    }

    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        if let Some(w) = header_u32(headers, "X-MBX-USED-WEIGHT-1M") {
            let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
            if w >= self.hard_limit && prev < self.hard_limit {
                warn!(used_weight = w, hard_limit = self.hard_limit, "rate-limit weight crossed buffer threshold");
            }
            debug!(used_weight_1m = w, "rate-limit weight updated from header");
        }
        if let Some(c) = header_u32(headers, "X-MBX-ORDER-COUNT-10S") {
            self.order_count_10s.store(c, Ordering::Relaxed);
        }
        if let Some(c) = header_u32(headers, "X-MBX-ORDER-COUNT-1D") {
            self.order_count_1d.store(c, Ordering::Relaxed);
        }
    }

    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current + weight <= self.hard_limit;
        if !allowed {
            warn!(current_weight = current, requested_weight = weight, hard_limit = self.hard_limit,
                "request blocked — would exceed buffered rate-limit ceiling");
        }
        allowed
    }

    pub fn can_place_order(&self) -> bool {
        let count_10s = self.order_count_10s.load(Ordering::Relaxed);
        let count_1d = self.order_count_1d.load(Ordering::Relaxed);
        if count_10s >= ORDER_10S_LIMIT {
            warn!(count_10s, limit = ORDER_10S_LIMIT, "order blocked — 10s order limit reached");
            return false;
        }
        if count_1d >= ORDER_1D_LIMIT {
            warn!(count_1d, limit = ORDER_1D_LIMIT, "order blocked — daily order limit reached");
            return false;
        }
        true
    }

    pub fn record_order_sent(&self) {
        self.order_count_10s.fetch_add(1, Ordering::Relaxed);
        self.order_count_1d.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_10s_counter(&self) {
        self.order_count_10s.store(0, Ordering::Relaxed);
    }

    pub fn reset_1m_weight(&self) {
        self.used_weight_1m.store(0, Ordering::Relaxed);
    }

    pub fn reset_daily_counter(&self) {
        self.order_count_1d.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed),
            order_count_10s: self.order_count_10s.load(Ordering::Relaxed),
            order_count_1d: self.order_count_1d.load(Ordering::Relaxed),
            hard_limit: self.hard_limit,
        }
    }
}

fn header_u32(headers: &reqwest::header::HeaderMap, key: &str) -> Option<u32> {
    headers.get(key)?.to_str().ok()?.parse().ok()
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .field("hard_limit", &self.hard_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_reduces_hard_limit_proportionally() {
        let tracker = RateLimitTracker::new(20.0);
        assert_eq!(tracker.hard_limit, 1920);
    }

    #[test]
    fn can_send_request_respects_buffered_ceiling() {
        let tracker = RateLimitTracker::new(20.0);
        tracker.used_weight_1m.store(1900, Ordering::Relaxed);
        assert!(!tracker.can_send_request(50));
        assert!(tracker.can_send_request(10));
    }
}
