// Liquidation (forceOrder) WebSocket stream. Same connect/read/reconnect
// shape as the teacher's trade stream (§4.1/§5: reconnect on close with a 5s
// delay, bound the connection phase to 10s). Exit fills are detected by
// polling (`reconcile::exit_fills`), not by a user-data-stream listener —
// this engine never opens a second socket.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::types::Side;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct LiquidationEvent {
    pub symbol: String,
    /// The side of the offsetting order the venue filled, not the side of
    /// the liquidated trader — callers invert per §4.1's hedge-mode rule.
    pub offsetting_order_side: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub venue_event_id: String,
    pub venue_ts: i64,
}

/// Runs the combined forceOrder stream (all symbols) until the connection
/// drops, then returns so the caller can reconnect. Never returns `Err` on a
/// routine disconnect — only on a failure to establish the connection at all.
pub async fn run_liquidation_stream(
    base_ws_url: &str,
    tx: mpsc::Sender<LiquidationEvent>,
) -> Result<()> {
    let url = format!("{base_ws_url}/ws/!forceOrder@arr");
    info!(url = %url, "connecting to liquidation stream");

    let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
        .await
        .context("liquidation stream connect timed out")?
        .context("failed to connect to liquidation stream")?;

    info!("liquidation stream connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                match parse_force_order(&text) {
                    Ok(events) => {
                        for event in events {
                            if tx.send(event).await.is_err() {
                                warn!("liquidation event receiver dropped, stopping stream");
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to parse forceOrder message"),
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(error = %e, "liquidation stream read error");
                return Ok(());
            }
            None => {
                warn!("liquidation stream ended");
                return Ok(());
            }
        }
    }
}

/// Runs `run_liquidation_stream` in a loop, reconnecting after
/// [`RECONNECT_DELAY`] on every disconnect, until the process is shut down.
pub async fn run_liquidation_stream_forever(base_ws_url: String, tx: mpsc::Sender<LiquidationEvent>) {
    loop {
        if let Err(e) = run_liquidation_stream(&base_ws_url, tx.clone()).await {
            error!(error = %e, "liquidation stream failed to connect");
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn parse_force_order(text: &str) -> Result<Vec<LiquidationEvent>> {
    let root: serde_json::Value = serde_json::from_str(text).context("bad forceOrder JSON")?;

    // The `!forceOrder@arr` stream delivers a JSON array payload under "data"
    // for the aggregate feed, or a single object for a per-symbol stream.
    let entries: Vec<&serde_json::Value> = if let Some(arr) = root.as_array() {
        arr.iter().collect()
    } else if let Some(arr) = root["data"].as_array() {
        arr.iter().collect()
    } else {
        vec![&root]
    };

    entries
        .into_iter()
        .map(|entry| {
            let order = &entry["o"];
            Ok(LiquidationEvent {
                symbol: order["s"]
                    .as_str()
                    .context("missing field s")?
                    .to_string(),
                offsetting_order_side: order["S"]
                    .as_str()
                    .context("missing field S")?
                    .to_string(),
                quantity: Decimal::from_str(order["q"].as_str().context("missing field q")?)
                    .context("bad quantity")?,
                price: Decimal::from_str(
                    order["ap"]
                        .as_str()
                        .filter(|s| !s.is_empty())
                        .or_else(|| order["p"].as_str())
                        .context("missing field p/ap")?,
                )
                .context("bad price")?,
                venue_event_id: format!(
                    "{}-{}-{}",
                    order["s"].as_str().unwrap_or_default(),
                    order["T"].as_i64().unwrap_or_default(),
                    order["i"].as_i64().unwrap_or_default(),
                ),
                venue_ts: entry["E"].as_i64().unwrap_or_else(|| order["T"].as_i64().unwrap_or(0)),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_force_order_array_payload() {
        let text = r#"{"e":"forceOrder","E":1700000000000,"o":{"s":"BTCUSDT","S":"SELL","q":"0.5","p":"60000.00","ap":"59950.00","T":1700000000000,"i":12345}}"#;
        let events = parse_force_order(text).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].symbol, "BTCUSDT");
        assert_eq!(events[0].price, Decimal::from_str("59950.00").unwrap());
        assert_eq!(Side::from_offsetting_order_side(&events[0].offsetting_order_side), Some(Side::Long));
    }
}
