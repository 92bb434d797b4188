//! Portfolio-level risk manager.
//!
//! Gates new entries on: max concurrent positions, correlated exposure,
//! daily trade count, daily loss limit (hard stop), and total portfolio
//! exposure. Tracks open notionals and daily realized PnL in memory; daily
//! counters reset at the UTC day boundary.

use crate::config::{PortfolioConfig, RiskConfig, SymbolsConfig};
use crate::gates::GateDecision;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

const STABLECOINS: [&str; 5] = ["USDT", "USDC", "BUSD", "DAI", "TUSD"];

#[derive(Debug, Clone)]
struct OpenPosition {
    notional: Decimal,
    #[allow(dead_code)]
    opened_at: DateTime<Utc>,
}

pub struct PortfolioRiskManager {
    symbols_config: SymbolsConfig,
    portfolio_config: PortfolioConfig,
    risk_config: RiskConfig,
    open_positions: HashMap<String, OpenPosition>,
    daily_trades_count: usize,
    daily_realized_pnl: Decimal,
    last_reset: NaiveDate,
}

impl PortfolioRiskManager {
    pub fn new(
        symbols_config: SymbolsConfig,
        portfolio_config: PortfolioConfig,
        risk_config: RiskConfig,
    ) -> Self {
        Self {
            symbols_config,
            portfolio_config,
            risk_config,
            open_positions: HashMap::new(),
            daily_trades_count: 0,
            daily_realized_pnl: Decimal::ZERO,
            last_reset: Utc::now().date_naive(),
        }
    }

    /// Current equity: starting cash adjusted by today's realized PnL.
    pub fn equity(&self) -> Decimal {
        self.risk_config.starting_cash_usd + self.daily_realized_pnl
    }

    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }

    pub fn daily_realized_pnl(&self) -> Decimal {
        self.daily_realized_pnl
    }

    /// Reset daily counters at the day boundary. Returns true if reset.
    pub fn reset_daily_counters(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today > self.last_reset {
            self.daily_trades_count = 0;
            self.daily_realized_pnl = Decimal::ZERO;
            self.last_reset = today;
            true
        } else {
            false
        }
    }

    /// Check whether a new position of `notional` USD may be opened.
    /// Checks run in fixed order; the first failure wins.
    pub fn can_open_position(
        &mut self,
        symbol: &str,
        notional: Decimal,
        now: DateTime<Utc>,
    ) -> GateDecision {
        self.reset_daily_counters(now);

        let max_concurrent = self.symbols_config.max_concurrent_positions;
        if self.open_positions.len() >= max_concurrent {
            return GateDecision::reject(format!(
                "max concurrent positions ({max_concurrent}) reached"
            ));
        }

        let max_correlated = self.portfolio_config.max_correlated_positions;
        let correlated = self
            .open_positions
            .keys()
            .filter(|open| is_correlated(symbol, open))
            .count();
        if correlated >= max_correlated {
            return GateDecision::reject(format!(
                "max correlated positions ({max_correlated}) reached"
            ));
        }

        let max_daily = self.portfolio_config.max_daily_trades;
        if self.daily_trades_count >= max_daily {
            return GateDecision::reject(format!("max daily trades ({max_daily}) reached"));
        }

        // Hard stop: once the daily loss limit is breached, no new entries.
        let max_daily_loss = self.portfolio_config.max_daily_loss_usd;
        if self.daily_realized_pnl <= -max_daily_loss {
            return GateDecision::reject(format!(
                "daily loss limit hit: ${}",
                self.daily_realized_pnl.round_dp(2)
            ));
        }

        let total_exposure: Decimal = self
            .open_positions
            .values()
            .map(|p| p.notional)
            .sum();
        let max_exposure =
            self.equity() * self.portfolio_config.max_portfolio_exposure_pct / dec!(100);
        if total_exposure + notional > max_exposure {
            return GateDecision::reject(format!(
                "portfolio exposure limit: ${} + ${} > ${}",
                total_exposure.round_dp(2),
                notional.round_dp(2),
                max_exposure.round_dp(2)
            ));
        }

        GateDecision::Allow
    }

    /// Register a newly opened position.
    pub fn add_position(&mut self, symbol: &str, notional: Decimal, now: DateTime<Utc>) {
        self.open_positions.insert(
            symbol.to_string(),
            OpenPosition {
                notional,
                opened_at: now,
            },
        );
        self.daily_trades_count += 1;
    }

    /// Close a position and roll its PnL into the daily total. Returns false
    /// if the symbol had no tracked position.
    pub fn close_position(&mut self, symbol: &str, pnl: Decimal) -> bool {
        if self.open_positions.remove(symbol).is_none() {
            return false;
        }
        self.daily_realized_pnl += pnl;
        true
    }

    /// Seed a position on startup recovery without counting it as a new
    /// daily trade.
    pub fn restore_position(&mut self, symbol: &str, notional: Decimal, opened_at: DateTime<Utc>) {
        self.open_positions.insert(
            symbol.to_string(),
            OpenPosition {
                notional,
                opened_at,
            },
        );
    }

    pub fn status_summary(&self) -> serde_json::Value {
        let total_exposure: Decimal = self.open_positions.values().map(|p| p.notional).sum();
        serde_json::json!({
            "open_positions": self.open_positions.len(),
            "max_concurrent": self.symbols_config.max_concurrent_positions,
            "daily_trades": self.daily_trades_count,
            "max_daily_trades": self.portfolio_config.max_daily_trades,
            "daily_pnl_usd": self.daily_realized_pnl,
            "daily_loss_limit_usd": self.portfolio_config.max_daily_loss_usd,
            "total_exposure_usd": total_exposure,
            "equity_usd": self.equity(),
            "max_exposure_pct": self.portfolio_config.max_portfolio_exposure_pct,
        })
    }
}

/// Simplified correlation: same base asset is correlated, except stablecoin
/// bases which are never correlated with each other.
fn is_correlated(symbol1: &str, symbol2: &str) -> bool {
    let base1 = symbol1.split('/').next().unwrap_or(symbol1);
    let base2 = symbol2.split('/').next().unwrap_or(symbol2);

    if STABLECOINS.contains(&base1) && STABLECOINS.contains(&base2) {
        return false;
    }
    base1 == base2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_concurrent: usize) -> PortfolioRiskManager {
        PortfolioRiskManager::new(
            SymbolsConfig {
                enabled: vec!["BTC/USDT".into(), "ETH/USDT".into()],
                max_concurrent_positions: max_concurrent,
            },
            PortfolioConfig::default(),
            RiskConfig::default(),
        )
    }

    #[test]
    fn blocks_at_max_concurrent() {
        let mut m = manager(1);
        let now = Utc::now();
        assert!(m.can_open_position("BTC/USDT", dec!(100), now).is_allowed());
        m.add_position("BTC/USDT", dec!(100), now);
        let decision = m.can_open_position("ETH/USDT", dec!(100), now);
        assert!(decision.reason().unwrap().contains("concurrent"));
    }

    #[test]
    fn blocks_correlated_base_assets() {
        let mut m = PortfolioRiskManager::new(
            SymbolsConfig {
                enabled: vec![],
                max_concurrent_positions: 10,
            },
            PortfolioConfig {
                max_correlated_positions: 1,
                ..PortfolioConfig::default()
            },
            RiskConfig::default(),
        );
        let now = Utc::now();
        m.add_position("BTC/USDT", dec!(100), now);
        let decision = m.can_open_position("BTC/EUR", dec!(100), now);
        assert!(decision.reason().unwrap().contains("correlated"));
        assert!(m.can_open_position("ETH/USDT", dec!(100), now).is_allowed());
    }

    #[test]
    fn stablecoins_never_correlated() {
        assert!(!is_correlated("USDT/EUR", "USDC/EUR"));
        assert!(is_correlated("BTC/USDT", "BTC/EUR"));
        assert!(!is_correlated("BTC/USDT", "ETH/USDT"));
    }

    #[test]
    fn daily_loss_limit_is_hard_stop() {
        let mut m = manager(10);
        let now = Utc::now();
        m.add_position("BTC/USDT", dec!(100), now);
        m.close_position("BTC/USDT", dec!(-150));
        let decision = m.can_open_position("ETH/USDT", dec!(100), now);
        assert!(decision.reason().unwrap().contains("daily loss limit"));
    }

    #[test]
    fn exposure_limit_counts_open_notionals() {
        let mut m = manager(10);
        let now = Utc::now();
        // Equity 10000, max exposure 50% = 5000.
        m.add_position("BTC/USDT", dec!(4000), now);
        assert!(m.can_open_position("ETH/USDT", dec!(900), now).is_allowed());
        let decision = m.can_open_position("ETH/USDT", dec!(1500), now);
        assert!(decision.reason().unwrap().contains("exposure"));
    }

    #[test]
    fn daily_counters_reset_on_new_day() {
        let mut m = manager(10);
        let now = Utc::now();
        m.add_position("BTC/USDT", dec!(100), now);
        m.close_position("BTC/USDT", dec!(-150));
        assert!(m.reset_daily_counters(now + chrono::Duration::days(1)));
        assert_eq!(m.daily_realized_pnl(), Decimal::ZERO);
        assert!(m
            .can_open_position("ETH/USDT", dec!(100), now + chrono::Duration::days(1))
            .is_allowed());
    }
}
