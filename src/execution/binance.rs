//! Binance spot adapter: signed REST calls with bounded retry.

use super::{ExchangeAdapter, ExchangeOrder, Ticker};
use crate::models::Side;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const MAINNET_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";
const MAX_ATTEMPTS: u32 = 3;

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceSpotAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    secret: String,
}

impl BinanceSpotAdapter {
    pub fn new(api_key: String, secret: String, testnet: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: if testnet { TESTNET_URL } else { MAINNET_URL }.to_string(),
            api_key,
            secret,
        })
    }

    fn market_symbol(symbol: &str) -> String {
        symbol.replace('/', "")
    }

    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| anyhow!("invalid HMAC secret"))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Send a signed request, retrying transport errors with backoff. HTTP
    /// error statuses are not retried: the exchange saw the request.
    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Value> {
        params.push(("timestamp".to_string(), Utc::now().timestamp_millis().to_string()));
        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .request(method.clone(), &url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let body: Value = resp
                        .json()
                        .await
                        .unwrap_or_else(|_| Value::String("unreadable body".to_string()));
                    if status.is_success() {
                        return Ok(body);
                    }
                    bail!("exchange rejected {path}: {status} {body}");
                }
                Err(e) => {
                    warn!(path, attempt, error = %e, "exchange transport error");
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
                    }
                }
            }
        }
        Err(last_err
            .map(|e| anyhow!(e).context(format!("exchange unreachable after {MAX_ATTEMPTS} attempts")))
            .unwrap_or_else(|| anyhow!("exchange unreachable")))
    }
}

fn field_decimal(value: &Value, key: &str) -> Option<Decimal> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| Decimal::from_str(raw).ok())
}

/// Average fill price: prefer the fills array, fall back to
/// cummulativeQuoteQty / executedQty.
fn average_fill_price(body: &Value) -> Option<Decimal> {
    if let Some(fills) = body.get("fills").and_then(Value::as_array) {
        let mut qty_sum = Decimal::ZERO;
        let mut cost_sum = Decimal::ZERO;
        for fill in fills {
            let price = field_decimal(fill, "price")?;
            let qty = field_decimal(fill, "qty")?;
            qty_sum += qty;
            cost_sum += price * qty;
        }
        if qty_sum > Decimal::ZERO {
            return Some(cost_sum / qty_sum);
        }
    }
    let quote = field_decimal(body, "cummulativeQuoteQty")?;
    let executed = field_decimal(body, "executedQty")?;
    if executed > Decimal::ZERO {
        Some(quote / executed)
    } else {
        None
    }
}

fn order_from_response(body: &Value) -> Result<ExchangeOrder> {
    let exchange_order_id = body
        .get("orderId")
        .map(|v| v.to_string())
        .context("missing orderId in exchange response")?;
    Ok(ExchangeOrder {
        exchange_order_id,
        client_order_id: body
            .get("clientOrderId")
            .and_then(Value::as_str)
            .map(str::to_string),
        avg_fill_price: average_fill_price(body),
        filled_qty: field_decimal(body, "executedQty"),
        status: body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string(),
    })
}

#[async_trait]
impl ExchangeAdapter for BinanceSpotAdapter {
    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder> {
        let mut params = vec![
            ("symbol".to_string(), Self::market_symbol(symbol)),
            ("side".to_string(), side.as_str().to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), quantity.to_string()),
        ];
        if let Some(id) = client_order_id {
            params.push(("newClientOrderId".to_string(), id.to_string()));
        }
        let body = self.send_signed(Method::POST, "/api/v3/order", params).await?;
        order_from_response(&body)
    }

    async fn cancel_order(&self, symbol: &str, exchange_order_id: &str) -> Result<()> {
        let params = vec![
            ("symbol".to_string(), Self::market_symbol(symbol)),
            ("orderId".to_string(), exchange_order_id.to_string()),
        ];
        self.send_signed(Method::DELETE, "/api/v3/order", params)
            .await?;
        Ok(())
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, Decimal>> {
        let body = self
            .send_signed(Method::GET, "/api/v3/account", vec![])
            .await?;
        let balances = body
            .get("balances")
            .and_then(Value::as_array)
            .context("missing balances in account response")?;

        let mut result = HashMap::new();
        for entry in balances {
            let Some(asset) = entry.get("asset").and_then(Value::as_str) else {
                continue;
            };
            if let Some(free) = field_decimal(entry, "free") {
                if free > Decimal::ZERO {
                    result.insert(asset.to_string(), free);
                }
            }
        }
        Ok(result)
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<ExchangeOrder>> {
        let params = vec![("symbol".to_string(), Self::market_symbol(symbol))];
        let body = self
            .send_signed(Method::GET, "/api/v3/openOrders", params)
            .await?;
        let rows = body
            .as_array()
            .context("open orders response is not an array")?;
        rows.iter().map(order_from_response).collect()
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        // Public endpoint; no signature required.
        let url = format!("{}/api/v3/ticker/bookTicker", self.base_url);
        let body: Value = self
            .client
            .get(&url)
            .query(&[("symbol", Self::market_symbol(symbol))])
            .send()
            .await
            .context("ticker request failed")?
            .error_for_status()
            .context("ticker request rejected")?
            .json()
            .await
            .context("ticker response was not JSON")?;

        let bid = field_decimal(&body, "bidPrice").context("missing bidPrice")?;
        let ask = field_decimal(&body, "askPrice").context("missing askPrice")?;
        Ok(Ticker {
            last: (bid + ask) / Decimal::from(2),
            bid,
            ask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn average_price_from_fills() {
        let body = json!({
            "fills": [
                {"price": "100", "qty": "1"},
                {"price": "102", "qty": "1"}
            ]
        });
        assert_eq!(average_fill_price(&body), Some(Decimal::from(101)));
    }

    #[test]
    fn average_price_from_cumulative_quote() {
        let body = json!({
            "cummulativeQuoteQty": "5050",
            "executedQty": "50"
        });
        assert_eq!(average_fill_price(&body), Some(Decimal::from(101)));
    }

    #[test]
    fn order_parse_requires_order_id() {
        assert!(order_from_response(&json!({"status": "FILLED"})).is_err());
        let order = order_from_response(&json!({
            "orderId": 12345,
            "clientOrderId": "QS-abc-ENTRY",
            "status": "FILLED",
            "executedQty": "0.1",
            "cummulativeQuoteQty": "5000"
        }))
        .unwrap();
        assert_eq!(order.exchange_order_id, "12345");
        assert_eq!(order.client_order_id.as_deref(), Some("QS-abc-ENTRY"));
        assert_eq!(order.avg_fill_price, Some(Decimal::from(50000)));
    }
}
