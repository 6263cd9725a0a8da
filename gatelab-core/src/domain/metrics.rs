//! Raw backtest metrics and the flat numeric bag that gates read from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scoring::DerivedScores;

/// Backtest output for one candidate, produced upstream of this engine.
///
/// `extra` holds any additional fields the producer emitted. Numeric extras are
/// exposed to gates under their own names; everything else is carried through
/// to the audit trail untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub net_profit: f64,
    /// Peak-to-trough drawdown. Sign convention is the producer's; scoring uses `|max_drawdown|`.
    pub max_drawdown: f64,
    pub trades: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharpe: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawMetrics {
    pub fn new(net_profit: f64, max_drawdown: f64, trades: u64) -> Self {
        Self {
            net_profit,
            max_drawdown,
            trades,
            profit_factor: None,
            sharpe: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_profit_factor(mut self, profit_factor: f64) -> Self {
        self.profit_factor = Some(profit_factor);
        self
    }

    pub fn with_sharpe(mut self, sharpe: f64) -> Self {
        self.sharpe = Some(sharpe);
        self
    }

    /// Average profit per trade. `None` when there were no trades.
    pub fn avg_profit_per_trade(&self) -> Option<f64> {
        if self.trades == 0 {
            None
        } else {
            Some(self.net_profit / self.trades as f64)
        }
    }
}

/// Well-known bag keys.
pub mod keys {
    pub const NET_PROFIT: &str = "net_profit";
    pub const MAX_DRAWDOWN: &str = "max_drawdown";
    pub const TRADES: &str = "trades";
    pub const PROFIT_FACTOR: &str = "profit_factor";
    pub const SHARPE: &str = "sharpe";
    pub const AVG_PROFIT_PER_TRADE: &str = "avg_profit_per_trade";
    pub const SCORE_NET_MDD: &str = "score_net_mdd";
    pub const TRADE_MULTIPLIER: &str = "trade_multiplier";
    pub const ROBUSTNESS_FACTOR: &str = "robustness_factor";
    pub const FINAL_SCORE: &str = "final_score";
}

/// Flat `name → f64` view over raw metrics and derived scores.
///
/// Backed by a `BTreeMap` so iteration (and therefore serialization) order is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsBag(BTreeMap<String, f64>);

impl MetricsBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bag with raw metrics only. Optional metrics that are absent stay absent.
    pub fn from_raw(raw: &RawMetrics) -> Self {
        let mut bag = Self::new();
        for (name, value) in &raw.extra {
            if let Some(v) = value.as_f64() {
                bag.insert(name.clone(), v);
            }
        }
        bag.insert(keys::NET_PROFIT, raw.net_profit);
        bag.insert(keys::MAX_DRAWDOWN, raw.max_drawdown);
        bag.insert(keys::TRADES, raw.trades as f64);
        if let Some(pf) = raw.profit_factor {
            bag.insert(keys::PROFIT_FACTOR, pf);
        }
        if let Some(sharpe) = raw.sharpe {
            bag.insert(keys::SHARPE, sharpe);
        }
        if let Some(avg) = raw.avg_profit_per_trade() {
            bag.insert(keys::AVG_PROFIT_PER_TRADE, avg);
        }
        bag
    }

    /// Bag with raw metrics and derived scores.
    pub fn build(raw: &RawMetrics, derived: &DerivedScores) -> Self {
        let mut bag = Self::from_raw(raw);
        bag.insert(keys::SCORE_NET_MDD, derived.score_net_mdd);
        bag.insert(keys::TRADE_MULTIPLIER, derived.trade_multiplier);
        if let Some(factor) = derived.robustness_factor {
            bag.insert(keys::ROBUSTNESS_FACTOR, factor);
        }
        bag.insert(keys::FINAL_SCORE, derived.final_score);
        bag
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for MetricsBag {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bag_omits_absent_optionals() {
        let bag = MetricsBag::from_raw(&RawMetrics::new(1000.0, 100.0, 50));
        assert_eq!(bag.get(keys::NET_PROFIT), Some(1000.0));
        assert_eq!(bag.get(keys::TRADES), Some(50.0));
        assert_eq!(bag.get(keys::AVG_PROFIT_PER_TRADE), Some(20.0));
        assert!(!bag.contains(keys::PROFIT_FACTOR));
        assert!(!bag.contains(keys::SHARPE));
    }

    #[test]
    fn zero_trades_has_no_average() {
        let raw = RawMetrics::new(10.0, 5.0, 0);
        assert_eq!(raw.avg_profit_per_trade(), None);
        assert!(!MetricsBag::from_raw(&raw).contains(keys::AVG_PROFIT_PER_TRADE));
    }

    #[test]
    fn extra_numeric_fields_reach_the_bag() {
        let json = r#"{"net_profit": 5.0, "max_drawdown": 2.0, "trades": 3, "win_rate": 0.6, "venue": "x"}"#;
        let raw: RawMetrics = serde_json::from_str(json).unwrap();
        let bag = MetricsBag::from_raw(&raw);
        assert_eq!(bag.get("win_rate"), Some(0.6));
        assert!(!bag.contains("venue"));
        assert_eq!(raw.extra.get("venue"), Some(&serde_json::json!("x")));
    }

    #[test]
    fn named_fields_win_over_extras() {
        let mut raw = RawMetrics::new(5.0, 2.0, 3);
        raw.extra.insert("net_profit".into(), serde_json::json!(999.0));
        assert_eq!(MetricsBag::from_raw(&raw).get(keys::NET_PROFIT), Some(5.0));
    }
}
