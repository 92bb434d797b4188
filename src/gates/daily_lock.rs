//! Daily profit lock.
//!
//! STOP mode blocks entries for the rest of the day once the realized-PnL
//! target is reached. OVERDRIVE mode keeps trading but protects a trailing
//! profit floor below the day's peak realized PnL, pausing entries whenever
//! PnL falls under the floor and resuming when it recovers. On startup the
//! peak is reconstructed from today's closed trades.

use crate::config::{DailyConfig, DailyLockMode};
use crate::gates::GateDecision;
use crate::persistence::{EngineRepository, EventDraft};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;

pub struct DailyLockManager {
    config: DailyConfig,
    tz: Tz,
    repo: EngineRepository,
    day: Option<NaiveDate>,
    engaged: bool,
    peak_reconstructed: bool,
    peak: Decimal,
    paused: bool,
}

impl DailyLockManager {
    pub fn new(config: DailyConfig, tz: Tz, repo: EngineRepository) -> Self {
        Self {
            config,
            tz,
            repo,
            day: None,
            engaged: false,
            peak_reconstructed: false,
            peak: Decimal::ZERO,
            paused: false,
        }
    }

    pub fn peak_realized_pnl(&self) -> Decimal {
        self.peak
    }

    pub fn floor_usd(&self) -> Decimal {
        self.peak - self.config.overdrive_trailing_buffer_usd
    }

    /// Evaluate the lock against today's realized PnL.
    pub fn check(&mut self, now: DateTime<Utc>) -> Result<GateDecision> {
        if !self.config.enabled {
            return Ok(GateDecision::Allow);
        }

        self.roll_day(now);
        let pnl = self.repo.get_today_realized_pnl(self.tz, now)?;

        match self.config.mode {
            DailyLockMode::Stop => self.check_stop(pnl),
            DailyLockMode::Overdrive => self.check_overdrive(pnl, now),
        }
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.with_timezone(&self.tz).date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.engaged = false;
            self.peak_reconstructed = false;
            self.peak = Decimal::ZERO;
            self.paused = false;
        }
    }

    fn check_stop(&mut self, pnl: Decimal) -> Result<GateDecision> {
        if pnl >= self.config.target_usd {
            self.engage(pnl)?;
            return Ok(GateDecision::reject(format!(
                "Daily target reached ({pnl} >= {})",
                self.config.target_usd
            )));
        }
        Ok(GateDecision::Allow)
    }

    fn check_overdrive(&mut self, pnl: Decimal, now: DateTime<Utc>) -> Result<GateDecision> {
        self.reconstruct_peak_if_needed(now)?;

        if pnl >= self.config.target_usd || self.peak >= self.config.target_usd {
            self.engage(pnl)?;
        }

        if pnl > self.peak {
            self.peak = pnl;
            if self.engaged {
                self.repo.append_event(
                    EventDraft::info("daily_lock.floor_updated")
                        .payload(json!({
                            "peak_realized_pnl": self.peak,
                            "floor_usd": self.floor_usd(),
                        }))
                        .public(),
                )?;
            }
        }

        // Floor protection only applies once the target has been reached.
        if !self.engaged {
            return Ok(GateDecision::Allow);
        }

        let floor = self.floor_usd();
        if pnl < floor {
            if !self.paused {
                self.paused = true;
                self.repo.append_event(
                    EventDraft::warn("daily_lock.entries_paused")
                        .payload(json!({
                            "realized_pnl": pnl,
                            "floor_usd": floor,
                        }))
                        .public(),
                )?;
            }
            return Ok(GateDecision::reject(format!(
                "profit floor breached ({pnl} < floor {floor})"
            )));
        }

        if self.paused {
            self.paused = false;
            self.repo.append_event(
                EventDraft::info("daily_lock.entries_resumed")
                    .payload(json!({
                        "realized_pnl": pnl,
                        "floor_usd": floor,
                    }))
                    .public(),
            )?;
        }

        Ok(GateDecision::Allow)
    }

    fn engage(&mut self, pnl: Decimal) -> Result<()> {
        if self.engaged {
            return Ok(());
        }
        self.engaged = true;
        info!(
            mode = ?self.config.mode,
            realized_pnl = %pnl,
            target = %self.config.target_usd,
            "daily lock engaged"
        );
        self.repo.append_event(
            EventDraft::info("daily_lock.engaged")
                .payload(json!({
                    "realized_pnl": pnl,
                    "target_usd": self.config.target_usd,
                    "mode": format!("{:?}", self.config.mode).to_uppercase(),
                }))
                .public(),
        )?;
        Ok(())
    }

    /// Rebuild the intraday peak as the running maximum of cumulative PnL
    /// over today's closed trades, in close order.
    fn reconstruct_peak_if_needed(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.peak_reconstructed {
            return Ok(());
        }
        self.peak_reconstructed = true;

        let trades = self.repo.get_today_closed_trades(self.tz, now)?;
        let mut cumulative = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        for trade in &trades {
            cumulative += trade.realized_pnl_usd.unwrap_or(Decimal::ZERO);
            peak = peak.max(cumulative);
        }
        if peak > self.peak {
            self.peak = peak;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use crate::persistence::{EventQuery, TradeMode, TradeRecord, TradeStatus};
    use rust_decimal_macros::dec;

    fn repo_with_today_pnls(pnls: &[Decimal]) -> EngineRepository {
        let repo = EngineRepository::open_in_memory().unwrap();
        for (i, pnl) in pnls.iter().enumerate() {
            let id = format!("t{i}");
            repo.save_trade(&TradeRecord {
                id: id.clone(),
                symbol: "BTC/USDT".to_string(),
                side: Side::Buy,
                status: TradeStatus::Open,
                mode: TradeMode::DryRun,
                entry_price: dec!(100),
                entry_qty: dec!(1),
                entry_notional_usd: dec!(100),
                opened_at: Utc::now(),
                stop_price: None,
                take_profit_price: None,
                trailing_enabled: false,
                trailing_offset: None,
                exit_price: None,
                closed_at: None,
                realized_pnl_usd: None,
                fees_paid_usd: None,
                slippage_est_usd: None,
                notes: None,
            })
            .unwrap();
            repo.close_trade(&id, dec!(100) + pnl, Utc::now(), *pnl, None)
                .unwrap();
        }
        repo
    }

    fn config(mode: DailyLockMode) -> DailyConfig {
        DailyConfig {
            enabled: true,
            mode,
            target_usd: dec!(100),
            overdrive_trailing_buffer_usd: dec!(10),
            timezone: "UTC".to_string(),
        }
    }

    fn event_types(repo: &EngineRepository) -> Vec<String> {
        repo.query_events(&EventQuery {
            limit: 100,
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
    }

    #[test]
    fn disabled_lock_always_allows() {
        let repo = repo_with_today_pnls(&[dec!(200)]);
        let mut config = config(DailyLockMode::Stop);
        config.enabled = false;
        let mut lock = DailyLockManager::new(config, chrono_tz::UTC, repo);
        assert!(lock.check(Utc::now()).unwrap().is_allowed());
    }

    #[test]
    fn stop_mode_below_target_allows() {
        let repo = repo_with_today_pnls(&[dec!(50)]);
        let mut lock = DailyLockManager::new(config(DailyLockMode::Stop), chrono_tz::UTC, repo);
        assert!(lock.check(Utc::now()).unwrap().is_allowed());
    }

    #[test]
    fn stop_mode_engages_at_target_and_emits_once() {
        let repo = repo_with_today_pnls(&[dec!(100)]);
        let mut lock =
            DailyLockManager::new(config(DailyLockMode::Stop), chrono_tz::UTC, repo.clone());

        let decision = lock.check(Utc::now()).unwrap();
        assert!(decision.reason().unwrap().contains("Daily target reached"));

        // A second check rejects again but does not re-emit.
        lock.check(Utc::now()).unwrap();
        let engaged_count = event_types(&repo)
            .iter()
            .filter(|t| t.as_str() == "daily_lock.engaged")
            .count();
        assert_eq!(engaged_count, 1);
    }

    #[test]
    fn overdrive_climbing_updates_floor() {
        let repo = repo_with_today_pnls(&[dec!(120)]);
        let mut lock =
            DailyLockManager::new(config(DailyLockMode::Overdrive), chrono_tz::UTC, repo.clone());

        assert!(lock.check(Utc::now()).unwrap().is_allowed());
        assert_eq!(lock.peak_realized_pnl(), dec!(120));
        assert_eq!(lock.floor_usd(), dec!(110));

        let types = event_types(&repo);
        assert!(types.contains(&"daily_lock.engaged".to_string()));
    }

    #[test]
    fn overdrive_drawdown_below_floor_pauses() {
        // Two trades: +60 then -15. Peak of cumulative PnL = 60, floor = 50,
        // current = 45 -> paused.
        let repo = repo_with_today_pnls(&[dec!(60), dec!(-15)]);
        let mut config = config(DailyLockMode::Overdrive);
        config.target_usd = dec!(50);
        let mut lock = DailyLockManager::new(config, chrono_tz::UTC, repo.clone());

        let decision = lock.check(Utc::now()).unwrap();
        assert_eq!(lock.peak_realized_pnl(), dec!(60));
        assert_eq!(lock.floor_usd(), dec!(50));
        assert!(decision.reason().unwrap().contains("profit floor breached"));
        assert!(event_types(&repo).contains(&"daily_lock.entries_paused".to_string()));
    }

    #[test]
    fn overdrive_reconstructs_peak_from_history() {
        // +50, +80, -20: cumulative 50, 130, 110 -> peak 130, floor 120,
        // current 110 < floor -> paused.
        let repo = repo_with_today_pnls(&[dec!(50), dec!(80), dec!(-20)]);
        let mut lock =
            DailyLockManager::new(config(DailyLockMode::Overdrive), chrono_tz::UTC, repo);

        let decision = lock.check(Utc::now()).unwrap();
        assert_eq!(lock.peak_realized_pnl(), dec!(130));
        assert_eq!(lock.floor_usd(), dec!(120));
        assert!(!decision.is_allowed());
    }
}
