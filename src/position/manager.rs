// Position lifecycle (§4.4). `applyEntryFill`/`applyExitFill` own the
// weighted-average and realized-P&L arithmetic; `db::positions` stays a pure
// repository. Idempotency is checked against `fill` before any position row
// is touched, per §8: "re-applying any already-persisted fill is a no-op."

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::db::models::{FillRow, PositionRow, TradeSessionRow};
use crate::db::{self, DbPool};
use crate::error::EngineError;
use crate::strategy::sizing;
use crate::types::{FillSide, Side};

/// Apply an entry (or layer) fill to (session, symbol, side): creates the
/// position on the first fill, otherwise recomputes the weighted-average
/// entry and bumps `layers_filled`. Returns the fill actually persisted
/// (unchanged on replay) alongside the resulting position.
#[allow(clippy::too_many_arguments)]
#[instrument(skip(pool, session), fields(session_id = session.id))]
pub async fn apply_entry_fill(
    pool: &DbPool,
    session: &TradeSessionRow,
    symbol: &str,
    side: Side,
    order_id: Option<i64>,
    venue_trade_id: &str,
    quantity: Decimal,
    price: Decimal,
    commission: Decimal,
    leverage: i64,
    max_layers: i64,
    filled_at: i64,
) -> Result<(PositionRow, FillRow), EngineError> {
    if let Some(existing) = db::fills::get_by_venue_trade_id(pool, venue_trade_id, session.id).await? {
        info!(venue_trade_id, "entry fill already applied, skipping");
        let position = db::positions::get(pool, existing.position_id).await?;
        return Ok((position, existing));
    }

    let notional = quantity * price;
    let existing_position = db::positions::get_open(pool, session.id, symbol, side).await?;

    let position = match existing_position {
        None => {
            db::positions::create(
                pool, session.id, symbol, side, quantity, price, notional, leverage, max_layers, filled_at,
            )
            .await?
        }
        Some(pos) => {
            if pos.layers_filled >= pos.max_layers {
                return Err(EngineError::invariant(format!(
                    "layer fill for {symbol} {side} would exceed max_layers {}",
                    pos.max_layers
                )));
            }
            let new_quantity = pos.quantity + quantity;
            let new_total_cost = pos.total_cost + notional;
            let new_avg_entry = new_total_cost / new_quantity;
            db::positions::apply_layer(
                pool,
                pos.id,
                new_quantity,
                new_avg_entry,
                new_total_cost,
                pos.layers_filled + 1,
            )
            .await?
        }
    };

    let fill_side = match side {
        Side::Long => FillSide::Buy,
        Side::Short => FillSide::Sell,
    };
    let (fill, _) = db::fills::insert_or_fetch(
        pool,
        venue_trade_id,
        session.id,
        order_id,
        position.id,
        symbol,
        fill_side,
        quantity,
        price,
        notional,
        commission,
        Some(position.layers_filled),
        filled_at,
    )
    .await?;

    Ok((position, fill))
}

/// Apply an exit fill (a protective order fill, or an operator-initiated
/// manual close) against an existing position: recomputes realized P&L for
/// the portion closed and calls `close_position_if_flat`. The engine never
/// submits the exit order itself — this only records the resulting fill.
#[allow(clippy::too_many_arguments)]
#[instrument(skip(pool, session, position), fields(position_id = position.id))]
pub async fn apply_exit_fill(
    pool: &DbPool,
    session: &TradeSessionRow,
    position: &PositionRow,
    order_id: Option<i64>,
    venue_trade_id: &str,
    quantity: Decimal,
    price: Decimal,
    commission: Decimal,
    filled_at: i64,
) -> Result<PositionRow, EngineError> {
    if let Some(existing) = db::fills::get_by_venue_trade_id(pool, venue_trade_id, session.id).await? {
        info!(venue_trade_id, "exit fill already applied, skipping");
        return db::positions::get(pool, existing.position_id).await;
    }

    let notional = quantity * price;
    let exit_side = match position.side() {
        Side::Long => FillSide::Sell,
        Side::Short => FillSide::Buy,
    };
    // Directional realized P&L: a long profits when the exit price exceeds
    // the average entry; a short profits on the reverse.
    let direction = match position.side() {
        Side::Long => Decimal::ONE,
        Side::Short => -Decimal::ONE,
    };
    let realized_delta = (price - position.avg_entry_price) * quantity * direction - commission;

    db::fills::insert_or_fetch(
        pool,
        venue_trade_id,
        session.id,
        order_id,
        position.id,
        &position.symbol,
        exit_side,
        quantity,
        price,
        notional,
        commission,
        None,
        filled_at,
    )
    .await?;

    let remaining = position.quantity - quantity;
    let updated = db::positions::apply_exit(pool, position.id, remaining.max(Decimal::ZERO)).await?;

    close_position_if_flat(pool, session, &updated, realized_delta, filled_at).await
}

/// Close the position once its net fill quantity nets to zero (§4.4): marks
/// `is_open=false`, writes `realized_pnl`, and banks the delta into the
/// session's running balance/P&L. Returns the position unchanged if still open.
#[instrument(skip(pool, session, position), fields(position_id = position.id))]
async fn close_position_if_flat(
    pool: &DbPool,
    session: &TradeSessionRow,
    position: &PositionRow,
    realized_delta: Decimal,
    now_ms: i64,
) -> Result<PositionRow, EngineError> {
    let net = db::fills::net_quantity(pool, position.id, position.side()).await?;
    if !net.is_zero() {
        return Ok(position.clone());
    }

    let total_realized = position.realized_pnl.unwrap_or(Decimal::ZERO) + realized_delta;
    let closed = db::positions::close(pool, position.id, total_realized, now_ms).await?;
    db::sessions::record_trade(pool, session.id, total_realized, total_realized).await?;
    info!(symbol = %closed.symbol, side = %closed.side(), realized_pnl = %total_realized, "position closed");
    Ok(closed)
}

/// Recompute `reserved_risk_dollars` from the position's current average
/// entry and stop distance, assuming `max_layers - layers_filled` future
/// layers at the given planned layer quantity (§4.4 reserveRisk — run on any
/// strategy change and any fill, not only on the entry decision path).
#[instrument(skip(pool, position))]
pub async fn reserve_risk(
    pool: &DbPool,
    position: &PositionRow,
    planned_layer_qty: Decimal,
    stop_distance_pct: Decimal,
) -> Result<Decimal, EngineError> {
    let reserved = sizing::projected_reserved_risk(
        position.avg_entry_price,
        position.quantity,
        planned_layer_qty,
        position.layers_filled,
        position.max_layers,
        stop_distance_pct,
    );
    if reserved.is_sign_negative() {
        warn!(position_id = position.id, %reserved, "computed negative reserved risk");
        return Err(EngineError::invariant("reserved risk computed as negative"));
    }
    db::positions::update_reserved_risk(pool, position.id, reserved).await?;
    Ok(reserved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::connect;
    use crate::db::strategy::test_support::sample_params;
    use crate::db::{sessions, strategy};

    async fn setup() -> (DbPool, TradeSessionRow) {
        let pool = connect("sqlite::memory:").await.unwrap();
        let strat = strategy::create(&pool, &sample_params(), 1_000).await.unwrap();
        let session = sessions::start(&pool, strat.id, Decimal::new(10_000, 0), 1_000)
            .await
            .unwrap();
        (pool, session)
    }

    #[tokio::test]
    async fn first_entry_fill_creates_position() {
        let (pool, session) = setup().await;
        let (position, fill) = apply_entry_fill(
            &pool, &session, "BTCUSDT", Side::Long, None, "e1",
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::ZERO, 5, 3, 1_000,
        ).await.unwrap();

        assert_eq!(position.layers_filled, 1);
        assert_eq!(position.quantity, Decimal::new(1, 0));
        assert_eq!(fill.venue_trade_id, "e1");
    }

    #[tokio::test]
    async fn second_layer_recomputes_weighted_average() {
        let (pool, session) = setup().await;
        apply_entry_fill(
            &pool, &session, "BTCUSDT", Side::Long, None, "e1",
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::ZERO, 5, 3, 1_000,
        ).await.unwrap();

        let (position, _) = apply_entry_fill(
            &pool, &session, "BTCUSDT", Side::Long, None, "e2",
            Decimal::new(1, 0), Decimal::new(58_000, 0), Decimal::ZERO, 5, 3, 2_000,
        ).await.unwrap();

        assert_eq!(position.layers_filled, 2);
        assert_eq!(position.quantity, Decimal::new(2, 0));
        assert_eq!(position.avg_entry_price, Decimal::new(59_000, 0));
    }

    #[tokio::test]
    async fn replaying_entry_fill_is_a_noop() {
        let (pool, session) = setup().await;
        apply_entry_fill(
            &pool, &session, "BTCUSDT", Side::Long, None, "e1",
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::ZERO, 5, 3, 1_000,
        ).await.unwrap();

        let (position, _) = apply_entry_fill(
            &pool, &session, "BTCUSDT", Side::Long, None, "e1",
            Decimal::new(5, 0), Decimal::new(1, 0), Decimal::ZERO, 5, 3, 9_999,
        ).await.unwrap();

        assert_eq!(position.quantity, Decimal::new(1, 0));
    }

    #[tokio::test]
    async fn full_exit_closes_position_and_banks_pnl() {
        let (pool, session) = setup().await;
        let (position, _) = apply_entry_fill(
            &pool, &session, "BTCUSDT", Side::Long, None, "e1",
            Decimal::new(1, 0), Decimal::new(60_000, 0), Decimal::ZERO, 5, 3, 1_000,
        ).await.unwrap();

        let closed = apply_exit_fill(
            &pool, &session, &position, None, "x1",
            Decimal::new(1, 0), Decimal::new(61_000, 0), Decimal::ZERO, 2_000,
        ).await.unwrap();

        assert!(!closed.is_open);
        assert_eq!(closed.closed_at, Some(2_000));
        assert_eq!(closed.realized_pnl, Some(Decimal::new(1_000, 0)));

        let refreshed = sessions::get(&pool, session.id).await.unwrap();
        assert_eq!(refreshed.running_pnl, Decimal::new(1_000, 0));
        assert_eq!(refreshed.trade_count, 1);
    }

    #[tokio::test]
    async fn partial_exit_leaves_position_open() {
        let (pool, session) = setup().await;
        let (position, _) = apply_entry_fill(
            &pool, &session, "BTCUSDT", Side::Long, None, "e1",
            Decimal::new(2, 0), Decimal::new(60_000, 0), Decimal::ZERO, 5, 3, 1_000,
        ).await.unwrap();

        let after_partial = apply_exit_fill(
            &pool, &session, &position, None, "x1",
            Decimal::new(1, 0), Decimal::new(61_000, 0), Decimal::ZERO, 2_000,
        ).await.unwrap();

        assert!(after_partial.is_open);
        assert_eq!(after_partial.quantity, Decimal::new(1, 0));
    }
}
