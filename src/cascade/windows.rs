// Fixed-capacity rolling sample windows backing the cascade detector's
// per-symbol state (§3 "Cascade state (in-memory)").

use std::collections::VecDeque;

use rust_decimal::Decimal;

/// A bounded FIFO of samples; pushing past `capacity` drops the oldest.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    capacity: usize,
    samples: VecDeque<T>,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn as_slice(&self) -> Vec<&T> {
        self.samples.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&T> {
        self.samples.back()
    }
}

/// The per-symbol window set: same-side liquidation notional (split by
/// side, 60 samples each), per-tick returns (60 samples), open-interest
/// snapshots (300 samples).
pub struct SymbolWindows {
    pub long_notional: RollingWindow<Decimal>,
    pub short_notional: RollingWindow<Decimal>,
    pub returns: RollingWindow<f64>,
    pub open_interest: RollingWindow<Decimal>,
    pub last_price: Option<Decimal>,
    pub last_oi_update_ms: i64,
}

impl SymbolWindows {
    pub fn new() -> Self {
        Self {
            long_notional: RollingWindow::new(60),
            short_notional: RollingWindow::new(60),
            returns: RollingWindow::new(60),
            open_interest: RollingWindow::new(300),
            last_price: None,
            last_oi_update_ms: 0,
        }
    }

    /// Fold one tick's price into the returns window, tracking `last_price`.
    pub fn push_price(&mut self, price: Decimal) {
        if let Some(prev) = self.last_price {
            if prev != Decimal::ZERO {
                let ret: f64 = ((price - prev) / prev).to_string().parse().unwrap_or(0.0);
                self.returns.push(ret);
            }
        }
        self.last_price = Some(price);
    }

    pub fn push_open_interest(&mut self, oi: Decimal, now_ms: i64) {
        self.open_interest.push(oi);
        self.last_oi_update_ms = now_ms;
    }

    pub fn push_liquidation(&mut self, side_is_long: bool, notional: Decimal) {
        if side_is_long {
            self.long_notional.push(notional);
        } else {
            self.short_notional.push(notional);
        }
    }
}

impl Default for SymbolWindows {
    fn default() -> Self {
        Self::new()
    }
}

/// Median of the non-zero values in `samples`. Returns `None` when every
/// sample is zero or the slice is empty.
pub fn median_nonzero(samples: &[Decimal]) -> Option<Decimal> {
    let mut nonzero: Vec<Decimal> = samples.iter().copied().filter(|v| !v.is_zero()).collect();
    if nonzero.is_empty() {
        return None;
    }
    nonzero.sort();
    let mid = nonzero.len() / 2;
    if nonzero.len() % 2 == 0 {
        Some((nonzero[mid - 1] + nonzero[mid]) / Decimal::from(2))
    } else {
        Some(nonzero[mid])
    }
}

pub fn sum(samples: &[Decimal]) -> Decimal {
    samples.iter().copied().sum()
}

pub fn stdev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_window_drops_oldest_past_capacity() {
        let mut w: RollingWindow<i32> = RollingWindow::new(3);
        w.push(1);
        w.push(2);
        w.push(3);
        w.push(4);
        assert_eq!(w.as_slice(), vec![&2, &3, &4]);
    }

    #[test]
    fn median_nonzero_ignores_zero_samples() {
        let samples = vec![Decimal::ZERO, Decimal::new(10, 0), Decimal::new(20, 0), Decimal::ZERO];
        assert_eq!(median_nonzero(&samples), Some(Decimal::new(15, 0)));
    }

    #[test]
    fn median_nonzero_is_none_when_all_zero() {
        let samples = vec![Decimal::ZERO, Decimal::ZERO];
        assert_eq!(median_nonzero(&samples), None);
    }

    #[test]
    fn stdev_of_constant_series_is_zero() {
        assert_eq!(stdev(&[1.0, 1.0, 1.0]), 0.0);
    }
}
