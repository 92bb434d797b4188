//! End-to-end engine tests over a real on-disk database.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

use quantsail_engine::config::{BotConfig, ExecutionMode};
use quantsail_engine::control::{BotController, BotState, InMemoryArmingCache, MemoryControlPlane};
use quantsail_engine::execution::{DryRunExecutor, ExecutionEngine};
use quantsail_engine::models::{ExitReason, Side, TradePlan};
use quantsail_engine::persistence::{
    EngineRepository, EventDraft, EventQuery, OrderStatus, OrderType, TradeStatus,
};

fn temp_repo() -> (EngineRepository, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quantsail-test.db");
    let repo = EngineRepository::open(path.to_str().unwrap()).unwrap();
    (repo, dir)
}

#[tokio::test]
async fn dry_run_take_profit_scenario() {
    // Entry 50 000, qty 0.1, SL 49 000, TP 52 000, zero costs.
    let executor = DryRunExecutor::new();
    let plan = TradePlan::new(
        "BTC/USDT",
        Side::Buy,
        dec!(50000),
        dec!(0.1),
        dec!(49000),
        dec!(52000),
        Decimal::ZERO,
        Decimal::ZERO,
        Decimal::ZERO,
        "scenario-1",
        Utc::now(),
    )
    .unwrap();

    let entry = executor.execute_entry(&plan).await.unwrap();
    assert_eq!(entry.orders.len(), 3);

    let exit = executor
        .check_exits("scenario-1", dec!(52000))
        .await
        .unwrap()
        .expect("take profit should fire at 52000");

    assert_eq!(exit.reason, ExitReason::TakeProfit);
    assert_eq!(exit.trade.exit_price, Some(dec!(52000)));

    // realized_pnl = (exit - entry) * qty = 200.0; pct = 4%.
    let pnl = exit.trade.realized_pnl_usd.unwrap();
    assert!((pnl - dec!(200)).abs() < dec!(0.000001));
    let pct = pnl / (dec!(50000) * dec!(0.1)) * dec!(100);
    assert_eq!(pct, dec!(4));

    let sl = exit
        .updated_orders
        .iter()
        .find(|o| o.order_type == OrderType::StopLoss)
        .unwrap();
    let tp = exit
        .updated_orders
        .iter()
        .find(|o| o.order_type == OrderType::TakeProfit)
        .unwrap();
    assert_eq!(sl.status, OrderStatus::Cancelled);
    assert_eq!(tp.status, OrderStatus::Filled);
}

#[test]
fn closed_trade_pnl_identity_holds_in_storage() {
    let (repo, _dir) = temp_repo();

    let plan_entry = dec!(50000);
    let qty = dec!(0.1);
    let exit_price = dec!(51234.5);

    repo.save_trade(&quantsail_engine::persistence::TradeRecord {
        id: "t1".to_string(),
        symbol: "BTC/USDT".to_string(),
        side: Side::Buy,
        status: TradeStatus::Open,
        mode: quantsail_engine::persistence::TradeMode::DryRun,
        entry_price: plan_entry,
        entry_qty: qty,
        entry_notional_usd: plan_entry * qty,
        opened_at: Utc::now(),
        stop_price: Some(dec!(49000)),
        take_profit_price: Some(dec!(52000)),
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

    let pnl = (exit_price - plan_entry) * qty;
    assert!(repo
        .close_trade("t1", exit_price, Utc::now(), pnl, None)
        .unwrap());

    let stored = repo.get_trade("t1").unwrap().unwrap();
    let identity =
        (stored.exit_price.unwrap() - stored.entry_price) * stored.entry_qty;
    assert!((stored.realized_pnl_usd.unwrap() - identity).abs() < dec!(0.000001));

    // The round trip is visible in the daily PnL aggregate.
    let today = repo
        .get_today_realized_pnl(chrono_tz::UTC, Utc::now())
        .unwrap();
    assert_eq!(today, pnl);
}

#[test]
fn event_log_is_strictly_ordered_and_cursor_resumable() {
    let (repo, _dir) = temp_repo();

    let mut seqs = Vec::new();
    for i in 0..10 {
        seqs.push(
            repo.append_event(EventDraft::info("it.event").payload(json!({"i": i})))
                .unwrap(),
        );
    }
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let all = repo
        .query_events(&EventQuery {
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(all.len(), 10);
    assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));

    // Resume after the 7th event: exactly the remainder, in order.
    let resumed = repo
        .query_events(&EventQuery {
            cursor: Some(seqs[6]),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(resumed.len(), 3);
    assert_eq!(resumed[0].seq, seqs[7]);
    assert_eq!(resumed[2].seq, seqs[9]);
}

#[tokio::test]
async fn arming_token_single_consumer_wins() {
    let controller = BotController::new(
        Arc::new(MemoryControlPlane::new(BotState::Stopped)),
        Arc::new(InMemoryArmingCache::new()),
    );
    let token = controller.arm().await.unwrap();

    // Two concurrent consumers race on the same token; exactly one wins.
    let c1 = controller.clone();
    let c2 = controller.clone();
    let t1 = token.clone();
    let t2 = token.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { c1.start(ExecutionMode::Live, Some(&t1)).await.is_ok() }),
        tokio::spawn(async move { c2.start(ExecutionMode::Live, Some(&t2)).await.is_ok() }),
    );
    let successes = [a.unwrap(), b.unwrap()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
}

#[test]
fn public_payloads_never_leak_forbidden_keys() {
    use quantsail_engine::api::sanitize::sanitize_payload;

    let dirty = json!({
        "symbol": "BTC/USDT",
        "exchange_order_id": "1",
        "idempotency_key": "2",
        "ciphertext": "3",
        "nonce": "4",
        "api_key": "5",
        "secret": "6",
        "id": "7",
        "trade_id": "8",
        "weird_Key_name": "9",
        "NESTED_SECRET": "10",
        "pnl_usd": 1.5,
    });
    let clean = sanitize_payload(&dirty);
    let map = clean.as_object().unwrap();

    for key in map.keys() {
        let lower = key.to_lowercase();
        assert!(!lower.contains("secret"), "leaked {key}");
        assert!(!lower.contains("key"), "leaked {key}");
        assert!(
            ![
                "exchange_order_id",
                "idempotency_key",
                "ciphertext",
                "nonce",
                "api_key",
                "secret",
                "id",
                "trade_id"
            ]
            .contains(&key.as_str()),
            "leaked {key}"
        );
    }
    assert_eq!(map.len(), 2);
}

#[test]
fn encryption_round_trip_through_repository() {
    use quantsail_engine::security::EncryptionService;

    let (repo, _dir) = temp_repo();
    let service = EncryptionService::new(
        "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff",
    )
    .unwrap();

    let (ciphertext, nonce) = service.encrypt("live-api-key:live-secret").unwrap();
    repo.insert_exchange_key("binance", Some("prod"), ciphertext, nonce, None)
        .unwrap();

    let creds = repo
        .get_active_exchange_credentials("binance", &service)
        .unwrap()
        .unwrap();
    assert_eq!(creds.0, "live-api-key");
    assert_eq!(creds.1, "live-secret");

    // No active key for an unknown exchange.
    assert!(repo
        .get_active_exchange_credentials("kraken", &service)
        .unwrap()
        .is_none());
}

#[test]
fn default_config_document_round_trips() {
    let config = BotConfig::default();
    let raw = serde_json::to_string(&config).unwrap();
    let parsed: BotConfig = serde_json::from_str(&raw).unwrap();
    parsed.validate().unwrap();
    assert_eq!(parsed.symbols.enabled, config.symbols.enabled);
}
