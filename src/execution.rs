// Entry-order submission (§4.3 "Entry execution" / "Layer execution").
// `market` submits immediately; `limit` chases the reference price, bounded
// by a cancellable deadline (`max_retry_duration_ms`) per §5's "the retry
// wait in limit-order chasing... MUST be cancellable".

use rust_decimal::Decimal;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, instrument, warn};

use crate::db::StrategyParams;
use crate::error::EngineError;
use crate::exchange::client::NewOrderResponse;
use crate::exchange::ExchangeClient;
use crate::types::{OrderType, Side};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Submit the entry order for a layer or a new position. Returns the venue's
/// fill response once the order has filled (fully, for a market order;
/// after the chase loop converges, for a limit order).
#[instrument(skip(exchange, strategy), fields(%symbol, %side))]
pub async fn submit_entry_order(
    exchange: &ExchangeClient,
    symbol: &str,
    side: Side,
    quantity: Decimal,
    reference_price: Decimal,
    strategy: &StrategyParams,
) -> Result<NewOrderResponse, EngineError> {
    let venue_side = side.entry_order_side();
    match strategy.order_type {
        OrderType::Market => {
            info!(%quantity, "submitting market entry order");
            exchange
                .place_order(symbol, venue_side, "MARKET", quantity, None, None, false, None, None)
                .await
        }
        OrderType::Limit => {
            chase_limit_entry(exchange, symbol, venue_side, quantity, reference_price, strategy).await
        }
    }
}

/// Price-chasing loop: place a limit order at `reference_price`; if it has
/// not filled once the market has moved beyond `slippage_tolerance_percent`,
/// cancel and re-place at the new reference. Gives up once the cumulative
/// elapsed time exceeds `max_retry_duration_ms` (§4.3, §5).
async fn chase_limit_entry(
    exchange: &ExchangeClient,
    symbol: &str,
    venue_side: &str,
    quantity: Decimal,
    mut reference_price: Decimal,
    strategy: &StrategyParams,
) -> Result<NewOrderResponse, EngineError> {
    let deadline = Instant::now() + Duration::from_millis(strategy.max_retry_duration_ms as u64);
    let slippage_pct = strategy.slippage_tolerance_percent / Decimal::new(100, 0);

    let mut working = exchange
        .place_order(
            symbol,
            venue_side,
            "LIMIT",
            quantity,
            Some(reference_price),
            None,
            false,
            Some("GTC"),
            None,
        )
        .await?;

    loop {
        if working.executed_qty >= quantity {
            return Ok(working);
        }
        if Instant::now() >= deadline {
            warn!(symbol, venue_side, "limit chase exceeded max_retry_duration_ms, cancelling");
            if let Err(err) = exchange.cancel_order(symbol, &working.venue_order_id).await {
                warn!(%err, "failed to cancel expired chase order");
            }
            return Err(EngineError::transient("limit order chase timed out"));
        }

        sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;

        let prices = exchange.get_all_ticker_prices().await?;
        let current_price = prices
            .into_iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, p)| p)
            .unwrap_or(reference_price);

        let drift = ((current_price - reference_price) / reference_price).abs();
        if drift <= slippage_pct {
            continue;
        }

        info!(%reference_price, %current_price, "market moved beyond slippage tolerance, re-pricing chase order");
        exchange.cancel_order(symbol, &working.venue_order_id).await?;
        reference_price = current_price;
        working = exchange
            .place_order(
                symbol,
                venue_side,
                "LIMIT",
                quantity,
                Some(reference_price),
                None,
                false,
                Some("GTC"),
                None,
            )
            .await?;
    }
}

/// Manual close (§6: "places a limit-reduce order at current market with
/// maker-grade fee"). Reduce-only, GTC limit at the current ticker price —
/// resting at the touch rather than crossing the spread keeps it a maker
/// fill on a venue that charges maker/taker differently. Unlike entry
/// submission, this never chases: the operator asked to exit now, not to
/// wait out a repricing loop.
#[instrument(skip(exchange), fields(%symbol, %side))]
pub async fn submit_manual_close(
    exchange: &ExchangeClient,
    symbol: &str,
    side: Side,
    quantity: Decimal,
    current_price: Decimal,
) -> Result<NewOrderResponse, EngineError> {
    let venue_side = side.exit_order_side();
    info!(%quantity, %current_price, "submitting manual close order");
    exchange
        .place_order(
            symbol,
            venue_side,
            "LIMIT",
            quantity,
            Some(current_price),
            None,
            true,
            Some("GTC"),
            None,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_bounded_by_remaining_deadline() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(100);
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(POLL_INTERVAL.min(remaining) <= Duration::from_millis(100));
    }
}
