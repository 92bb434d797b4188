//! Binance spot market data over REST.

use super::MarketDataProvider;
use crate::models::{Candle, Orderbook};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

const MAINNET_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";

pub struct BinanceMarketData {
    client: Client,
    base_url: String,
}

impl BinanceMarketData {
    pub fn new(testnet: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: if testnet { TESTNET_URL } else { MAINNET_URL }.to_string(),
        })
    }

    /// "BTC/USDT" -> "BTCUSDT"
    fn market_symbol(symbol: &str) -> String {
        symbol.replace('/', "")
    }
}

#[async_trait]
impl MarketDataProvider for BinanceMarketData {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response: Value = self
            .client
            .get(&url)
            .query(&[
                ("symbol", Self::market_symbol(symbol)),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("klines request failed")?
            .error_for_status()
            .context("klines request rejected")?
            .json()
            .await
            .context("klines response was not JSON")?;

        let Some(rows) = response.as_array() else {
            bail!("unexpected klines response shape");
        };

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(fields) = row.as_array() else {
                bail!("unexpected kline row shape");
            };
            if fields.len() < 6 {
                bail!("kline row too short: {} fields", fields.len());
            }
            let open_time = fields[0]
                .as_i64()
                .context("kline open time is not an integer")?;
            let ts = Utc
                .timestamp_millis_opt(open_time)
                .single()
                .context("kline open time out of range")?;
            candles.push(Candle::new(
                ts,
                json_decimal(&fields[1])?,
                json_decimal(&fields[2])?,
                json_decimal(&fields[3])?,
                json_decimal(&fields[4])?,
                json_decimal(&fields[5])?,
            )?);
        }
        Ok(candles)
    }

    async fn get_orderbook(&self, symbol: &str, depth: usize) -> Result<Orderbook> {
        let url = format!("{}/api/v3/depth", self.base_url);
        let response: Value = self
            .client
            .get(&url)
            .query(&[
                ("symbol", Self::market_symbol(symbol)),
                ("limit", depth.to_string()),
            ])
            .send()
            .await
            .context("depth request failed")?
            .error_for_status()
            .context("depth request rejected")?
            .json()
            .await
            .context("depth response was not JSON")?;

        let bids = parse_levels(response.get("bids")).context("bad bids in depth response")?;
        let asks = parse_levels(response.get("asks")).context("bad asks in depth response")?;
        Orderbook::new(bids, asks)
    }
}

fn json_decimal(value: &Value) -> Result<Decimal> {
    let raw = value
        .as_str()
        .with_context(|| format!("expected string price field, got {value}"))?;
    Decimal::from_str(raw).with_context(|| format!("invalid decimal: {raw}"))
}

fn parse_levels(value: Option<&Value>) -> Result<Vec<(Decimal, Decimal)>> {
    let rows = value
        .and_then(Value::as_array)
        .context("missing depth levels")?;
    rows.iter()
        .map(|row| {
            let fields = row.as_array().context("level is not an array")?;
            if fields.len() < 2 {
                bail!("level needs price and quantity");
            }
            Ok((json_decimal(&fields[0])?, json_decimal(&fields[1])?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_symbol_strips_slash() {
        assert_eq!(BinanceMarketData::market_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(BinanceMarketData::market_symbol("ETHUSDT"), "ETHUSDT");
    }

    #[test]
    fn parse_levels_round_trip() {
        let value = serde_json::json!([["100.5", "2"], ["100.0", "1"]]);
        let levels = parse_levels(Some(&value)).unwrap();
        assert_eq!(levels[0].0, Decimal::from_str("100.5").unwrap());
        assert_eq!(levels[1].1, Decimal::ONE);
    }

    #[test]
    fn parse_levels_rejects_garbage() {
        let value = serde_json::json!(["nope"]);
        assert!(parse_levels(Some(&value)).is_err());
    }
}
