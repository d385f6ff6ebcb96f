// Position sizing and reserved-risk arithmetic (§3 Strategy fields, §4.3
// items 6-7, §4.4 reserveRisk). All money/quantity math is `Decimal` — never
// binary floating point (Design Notes §9).

use rust_decimal::Decimal;

use crate::db::StrategyParams;

fn min_stop_distance_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn max_stop_distance_pct() -> Decimal {
    Decimal::new(15, 2) // 0.15
}

/// Quantity for one layer: `balance * position_size_percent/100 * leverage / price`.
/// Every layer (filled or still projected) is assumed to use this same
/// formula evaluated at the current price — the simplification the position
/// manager and risk-budget gate both rely on, since future layer prices are
/// unknowable in advance.
pub fn layer_quantity(balance: Decimal, position_size_percent: Decimal, leverage: i64, price: Decimal) -> Decimal {
    if price.is_zero() {
        return Decimal::ZERO;
    }
    balance * position_size_percent / Decimal::new(100, 0) * Decimal::from(leverage) / price
}

/// The stop-loss distance as a fraction of entry price (e.g. 0.02 for 2%).
/// When `use_adaptive_atr` is set and an ATR sample is available, uses
/// `atr_multiplier * atr / price`, clamped to [1%, 15%] per §3; otherwise
/// falls back to the strategy's fixed `stop_loss_percent`.
pub fn stop_loss_distance_pct(strategy: &StrategyParams, atr: Option<Decimal>, price: Decimal) -> Decimal {
    let raw = match (strategy.use_adaptive_atr, strategy.atr_multiplier, atr) {
        (true, Some(k), Some(atr)) if !price.is_zero() => (k * atr) / price,
        _ => strategy.stop_loss_percent / Decimal::new(100, 0),
    };
    raw.max(min_stop_distance_pct()).min(max_stop_distance_pct())
}

/// Full projected reserved risk for a position after applying this layer:
/// loss-per-unit (at the post-fill average entry) times the already-filled
/// quantity plus the still-unfilled projected layers up to `max_layers`,
/// each estimated at `this_layer_qty`.
pub fn projected_reserved_risk(
    avg_entry_price: Decimal,
    quantity_filled_after: Decimal,
    this_layer_qty: Decimal,
    layers_filled_after: i64,
    max_layers: i64,
    stop_distance_pct: Decimal,
) -> Decimal {
    let loss_per_unit = avg_entry_price * stop_distance_pct;
    let remaining_layers = (max_layers - layers_filled_after).max(0);
    let projected_future_qty = this_layer_qty * Decimal::from(remaining_layers);
    loss_per_unit * (quantity_filled_after + projected_future_qty)
}

/// The risk-budget gate's delta: the projected reserved risk after adding
/// this layer minus whatever was already reserved for the position (zero
/// for a brand-new entry).
pub fn reserved_risk_delta(new_projected: Decimal, existing_reserved: Decimal) -> Decimal {
    new_projected - existing_reserved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::strategy::test_support::sample_params;

    #[test]
    fn layer_quantity_divides_notional_by_price() {
        let qty = layer_quantity(Decimal::new(10_000, 0), Decimal::new(10, 0), 1, Decimal::new(100, 0));
        assert_eq!(qty, Decimal::new(10, 0));
    }

    #[test]
    fn dca_reserved_risk_matches_seed_scenario() {
        let mut strategy = sample_params();
        strategy.max_layers = 3;
        strategy.position_size_percent = Decimal::new(10, 0);
        strategy.stop_loss_percent = Decimal::new(2, 0);
        strategy.use_adaptive_atr = false;

        let balance = Decimal::new(10_000, 0);
        let price = Decimal::new(100, 0);
        let layer_qty = layer_quantity(balance, strategy.position_size_percent, 1, price);
        assert_eq!(layer_qty, Decimal::new(10, 0));

        let stop_pct = stop_loss_distance_pct(&strategy, None, price);
        let reserved = projected_reserved_risk(price, layer_qty, layer_qty, 1, strategy.max_layers, stop_pct);
        assert_eq!(reserved, Decimal::new(60, 0));

        // Raising stop_loss_percent to 10% re-reserves to ~300 with layer 1 still open.
        strategy.stop_loss_percent = Decimal::new(10, 0);
        let stop_pct_raised = stop_loss_distance_pct(&strategy, None, price);
        let reserved_raised =
            projected_reserved_risk(price, layer_qty, layer_qty, 1, strategy.max_layers, stop_pct_raised);
        assert_eq!(reserved_raised, Decimal::new(300, 0));
    }

    #[test]
    fn stop_distance_is_clamped_to_one_and_fifteen_percent() {
        let mut strategy = sample_params();
        strategy.use_adaptive_atr = false;

        strategy.stop_loss_percent = Decimal::new(50, 0); // 50% -> clamp to 15%
        assert_eq!(stop_loss_distance_pct(&strategy, None, Decimal::new(100, 0)), max_stop_distance_pct());

        strategy.stop_loss_percent = Decimal::new(0, 0); // 0% -> clamp to 1%
        assert_eq!(stop_loss_distance_pct(&strategy, None, Decimal::new(100, 0)), min_stop_distance_pct());
    }
}
