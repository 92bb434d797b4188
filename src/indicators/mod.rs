//! Deterministic list-in / list-out technical indicators.
//!
//! All indicators return a vector the same length as the input, with
//! positions before sufficient data set to zero. ATR and ADX use Wilder
//! smoothing.

mod adx;
mod atr;
mod bollinger;
mod donchian;
mod ema;
mod macd;
mod obv;
mod rsi;
mod vwap;

pub use adx::calculate_adx;
pub use atr::calculate_atr;
pub use bollinger::{calculate_bollinger_bands, BollingerBands};
pub use donchian::{calculate_donchian_channels, DonchianChannels};
pub use ema::{calculate_ema, calculate_sma};
pub use macd::{calculate_macd, MacdResult};
pub use obv::calculate_obv;
pub use rsi::calculate_rsi;
pub use vwap::calculate_vwap;
