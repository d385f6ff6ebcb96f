// Stream frame -> dedup -> persist-or-fetch -> fan-out (§4.1). The ingress
// swallows all downstream errors so stream consumption is never interrupted
// (§7 "Propagation").

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::db::{self, DbPool, LiquidationRow};
use crate::exchange::stream::LiquidationEvent;
use crate::ingress::dedup::DedupMap;
use crate::keyed_lock::KeyedMutex;
use crate::types::Side;

/// Minimum grace period the per-event lock is held after fan-out, so that a
/// duplicate frame delivered a few milliseconds later (the common case on
/// stream reconnect) observes the lock rather than racing persistence.
const EVENT_LOCK_GRACE: Duration = Duration::from_millis(100);

pub struct LiquidationIngress {
    pool: DbPool,
    dedup: DedupMap,
    event_locks: KeyedMutex<String>,
    downstream: mpsc::Sender<LiquidationRow>,
}

impl LiquidationIngress {
    pub fn new(pool: DbPool, downstream: mpsc::Sender<LiquidationRow>) -> Self {
        Self {
            pool,
            dedup: DedupMap::new(),
            event_locks: KeyedMutex::new(),
            downstream,
        }
    }

    /// Drains `rx` forever, processing one frame at a time. Each frame's
    /// processing is independent — a slow or failing frame does not block
    /// frames for other event identifiers, since the per-event lock is keyed
    /// by event id, not held across the whole loop.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<LiquidationEvent>) {
        while let Some(event) = rx.recv().await {
            let this = self.clone();
            tokio::spawn(async move {
                this.process_one(event).await;
            });
        }
    }

    async fn process_one(&self, event: LiquidationEvent) {
        // Read live rather than from a cached snapshot, so a strategy edited
        // through the operator API takes effect on the very next frame (§2,
        // §4.1 "selected_assets" is read at decision time, not boot time).
        let selected = match db::strategy::get_active(&self.pool).await {
            Ok(Some(strategy)) => strategy.params.selected_assets,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "failed to load active strategy for ingress filter");
                return;
            }
        };
        if !selected.iter().any(|s| s == &event.symbol) {
            return;
        }

        let Some(side) = Side::from_offsetting_order_side(&event.offsetting_order_side) else {
            warn!(side = %event.offsetting_order_side, "unrecognized offsetting order side, dropping frame");
            return;
        };

        let event_id = event.venue_event_id.clone();
        let now_ms = event.venue_ts;

        // Layer 1: in-memory dedup, cheap and synchronous.
        if self.dedup.seen(&event_id, now_ms) {
            debug!(event_id = %event_id, "duplicate liquidation frame (memory layer)");
            return;
        }

        // Mutual exclusion for this event identifier across concurrent
        // deliveries (e.g. overlapping reconnect windows).
        let _guard = self.event_locks.lock(event_id.clone()).await;

        let notional = event.quantity * event.price;
        let side_str = side.to_string();
        let row = match db::liquidations::insert_or_fetch(
            &self.pool,
            &event_id,
            &event.symbol,
            &side_str,
            event.quantity,
            event.price,
            notional,
            event.venue_ts,
            now_ms,
        )
        .await
        {
            Ok((row, was_new)) => {
                if !was_new {
                    debug!(event_id = %event_id, "duplicate liquidation frame (database layer)");
                }
                row
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "failed to persist liquidation");
                return;
            }
        };

        if self.downstream.send(row).await.is_err() {
            warn!("strategy engine channel closed, dropping liquidation fan-out");
        }

        tokio::time::sleep(EVENT_LOCK_GRACE).await;
    }
}
