// Orphan-position detection (§4.5): pull `positionRisk` from the venue; any
// non-zero position whose (symbol, side) is absent from the local open set
// gets a synthesized position row, a synthetic entry fill, and an immediate
// protective-order pair. Modeled on the teacher's `reconcile_once` matched/
// orphan comparison, generalized from spot balances to futures positions.

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::db::models::TradeSessionRow;
use crate::db::{self, DbPool, StrategyParams};
use crate::error::EngineError;
use crate::exchange::ExchangeClient;
use crate::position::protective_orders;
use crate::strategy::sizing;
use crate::types::Side;

/// One sweep: compare the venue's reported positions against the local open
/// set for `session` and synthesize any missing local record. Returns the
/// number of orphans adopted.
#[instrument(skip(pool, exchange, session, strategy), fields(session_id = session.id))]
pub async fn sweep(
    pool: &DbPool,
    exchange: &ExchangeClient,
    session: &TradeSessionRow,
    strategy: &StrategyParams,
    now_ms: i64,
) -> Result<usize, EngineError> {
    let venue_positions = exchange.get_position_risk().await?;
    let mut adopted = 0usize;

    for risk in venue_positions {
        if risk.position_amt.is_zero() {
            continue;
        }
        let side = if risk.position_amt.is_sign_positive() {
            Side::Long
        } else {
            Side::Short
        };
        let quantity = risk.position_amt.abs();

        if db::positions::get_open(pool, session.id, &risk.symbol, side).await?.is_some() {
            continue;
        }

        warn!(symbol = %risk.symbol, %side, %quantity, "adopting orphan position reported by venue");

        let synthetic_trade_id = format!("orphan-adopt-{}-{}-{now_ms}", risk.symbol, side);
        let (position, _fill) = crate::position::manager::apply_entry_fill(
            pool,
            session,
            &risk.symbol,
            side,
            None,
            &synthetic_trade_id,
            quantity,
            risk.entry_price,
            Decimal::ZERO,
            risk.leverage,
            strategy.max_layers,
            now_ms,
        )
        .await?;

        let stop_distance_pct = sizing::stop_loss_distance_pct(strategy, None, risk.entry_price);
        if let Err(err) =
            protective_orders::reconcile(pool, exchange, &position, strategy, stop_distance_pct, now_ms).await
        {
            warn!(symbol = %risk.symbol, %err, "failed to attach protective orders to adopted orphan");
        }

        adopted += 1;
    }

    if adopted > 0 {
        info!(adopted, "orphan sweep adopted positions");
    }
    Ok(adopted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_position_amt_maps_to_short() {
        let amt = Decimal::new(-5, 1);
        let side = if amt.is_sign_positive() { Side::Long } else { Side::Short };
        assert_eq!(side, Side::Short);
        assert_eq!(amt.abs(), Decimal::new(5, 1));
    }
}
