// Unrealized-P&L recompute for open positions. Deliberately read-only: this
// tick never submits a close order, per the Open Question 3 resolution
// (programmatic exits happen only through the protective STOP_MARKET/
// take-profit orders already resting on the venue, never a market close
// issued from here). Grounded on the teacher's exit-monitor price-update
// sub-loop (`main.rs` step 8), stripped of barrier/micro-trail evaluation
// since this engine exits exclusively through resting venue orders.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::warn;

use crate::db::models::TradeSessionRow;
use crate::db::{self, DbPool};
use crate::error::EngineError;
use crate::exchange::ExchangeClient;
use crate::types::Side;

/// Recompute and persist `unrealized_pnl` for every open position in
/// `session`, using a single batched ticker-price fetch. Positions whose
/// symbol is missing from the price batch are left untouched rather than
/// zeroed, since a stale price is a better estimate than a wrong one.
pub async fn tick(
    pool: &DbPool,
    exchange: &ExchangeClient,
    session: &TradeSessionRow,
) -> Result<usize, EngineError> {
    let open = db::positions::list_open(pool, session.id).await?;
    if open.is_empty() {
        return Ok(0);
    }

    let prices: HashMap<String, Decimal> =
        exchange.get_all_ticker_prices().await?.into_iter().collect();

    let mut updated = 0usize;
    for position in &open {
        let Some(&price) = prices.get(&position.symbol) else {
            warn!(symbol = %position.symbol, "exit monitor: no ticker price for open position, skipping");
            continue;
        };

        let unrealized = unrealized_pnl(position.side(), position.quantity, position.avg_entry_price, price);
        db::positions::update_unrealized_pnl(pool, position.id, unrealized).await?;
        updated += 1;
    }

    Ok(updated)
}

fn unrealized_pnl(side: Side, quantity: Decimal, avg_entry_price: Decimal, current_price: Decimal) -> Decimal {
    let diff = current_price - avg_entry_price;
    match side {
        Side::Long => diff * quantity,
        Side::Short => -diff * quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_gains_when_price_rises() {
        let pnl = unrealized_pnl(Side::Long, Decimal::new(2, 0), Decimal::new(100, 0), Decimal::new(110, 0));
        assert_eq!(pnl, Decimal::new(20, 0));
    }

    #[test]
    fn short_gains_when_price_falls() {
        let pnl = unrealized_pnl(Side::Short, Decimal::new(2, 0), Decimal::new(100, 0), Decimal::new(90, 0));
        assert_eq!(pnl, Decimal::new(20, 0));
    }

    #[test]
    fn short_loses_when_price_rises() {
        let pnl = unrealized_pnl(Side::Short, Decimal::new(1, 0), Decimal::new(100, 0), Decimal::new(110, 0));
        assert_eq!(pnl, Decimal::new(-10, 0));
    }
}
