//! Trading signals produced by strategies on every tick.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Action requested by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// A trading signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Intended price. Zero means "market", i.e. the candle close.
    pub price: Decimal,
    /// Requested amount. Zero lets the engine size the position.
    pub amount: Decimal,
    pub reason: String,
    /// Dynamic stop price overriding the configured percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    /// Dynamic target price overriding the configured percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
}

impl Signal {
    fn with_action(action: SignalAction, confidence: f64, reason: &str) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            price: Decimal::ZERO,
            amount: Decimal::ZERO,
            reason: reason.to_string(),
            stop_loss: None,
            take_profit: None,
        }
    }

    /// Create a buy signal.
    pub fn buy(confidence: f64, reason: &str) -> Self {
        Self::with_action(SignalAction::Buy, confidence, reason)
    }

    /// Create a sell signal.
    pub fn sell(confidence: f64, reason: &str) -> Self {
        Self::with_action(SignalAction::Sell, confidence, reason)
    }

    /// Create a hold signal.
    pub fn hold() -> Self {
        Self::with_action(SignalAction::Hold, 0.0, "hold")
    }

    pub fn at_price(mut self, price: Decimal) -> Self {
        self.price = price;
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_stops(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.action, SignalAction::Buy | SignalAction::Sell)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::hold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_builders() {
        let signal = Signal::buy(1.4, "breakout")
            .at_price(Decimal::new(100, 0))
            .with_amount(Decimal::new(2, 0));
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.confidence, 1.0);
        assert_eq!(signal.price, Decimal::new(100, 0));
        assert!(signal.is_entry());
        assert!(!Signal::hold().is_entry());
    }

    #[test]
    fn test_signal_serde_lowercase_action() {
        let json = serde_json::to_string(&Signal::sell(0.5, "exit")).unwrap();
        assert!(json.contains("\"action\":\"sell\""));
        assert!(!json.contains("stop_loss"));
    }
}
