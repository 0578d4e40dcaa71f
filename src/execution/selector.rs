//! Algorithm selector (§4.7.1): chooses an execution algorithm label from a
//! market-state feature vector. A trained multiclass model is an external
//! collaborator (non-goal); the heuristic fallback is always available.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgoLabel {
    Twap,
    Vwap,
    Iceberg,
    Sniper,
    Market,
}

#[derive(Debug, Clone, Copy)]
pub struct MarketState {
    pub urgency_score: f64,
    pub order_size_pct: f64,
    pub volatility: f64,
    pub spread_pct: f64,
    pub volume_roll_avg: f64,
}

/// A trained classifier occupying this seam would implement this trait;
/// none is bundled (non-goal).
pub trait AlgoClassifier: Send + Sync {
    fn predict(&self, state: &MarketState) -> Option<AlgoLabel>;
}

/// `urgency>0.8 => twap; size>0.05 & vol<0.02 => iceberg; vol>0.05 => sniper;
/// default vwap`.
pub fn heuristic_select(state: &MarketState) -> AlgoLabel {
    if state.urgency_score > 0.8 {
        AlgoLabel::Twap
    } else if state.order_size_pct > 0.05 && state.volatility < 0.02 {
        AlgoLabel::Iceberg
    } else if state.volatility > 0.05 {
        AlgoLabel::Sniper
    } else {
        AlgoLabel::Vwap
    }
}

pub fn select(classifier: Option<&dyn AlgoClassifier>, state: &MarketState) -> AlgoLabel {
    classifier.and_then(|c| c.predict(state)).unwrap_or_else(|| heuristic_select(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(urgency: f64, size: f64, vol: f64) -> MarketState {
        MarketState { urgency_score: urgency, order_size_pct: size, volatility: vol, spread_pct: 0.001, volume_roll_avg: 1000.0 }
    }

    #[test]
    fn high_urgency_selects_twap() {
        assert_eq!(heuristic_select(&state(0.9, 0.01, 0.01)), AlgoLabel::Twap);
    }

    #[test]
    fn large_size_low_vol_selects_iceberg() {
        assert_eq!(heuristic_select(&state(0.2, 0.1, 0.01)), AlgoLabel::Iceberg);
    }

    #[test]
    fn high_vol_selects_sniper() {
        assert_eq!(heuristic_select(&state(0.2, 0.01, 0.1)), AlgoLabel::Sniper);
    }

    #[test]
    fn default_is_vwap() {
        assert_eq!(heuristic_select(&state(0.2, 0.01, 0.03)), AlgoLabel::Vwap);
    }

    #[test]
    fn classifier_overrides_heuristic_when_present() {
        struct Always;
        impl AlgoClassifier for Always {
            fn predict(&self, _state: &MarketState) -> Option<AlgoLabel> {
                Some(AlgoLabel::Sniper)
            }
        }
        let result = select(Some(&Always), &state(0.9, 0.01, 0.01));
        assert_eq!(result, AlgoLabel::Sniper);
    }
}
