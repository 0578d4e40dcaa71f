//! Venue router: picks the adapter for a symbol by venue-universe membership
//! (§6.2), with an explicit override carried in Execution Order metadata
//! taking priority.

use std::collections::HashSet;
use std::sync::Arc;

use crate::execution::venue::VenueAdapter;
use crate::types::Symbol;

pub struct VenueRouter {
    centralized_perp: HashSet<Symbol>,
    onchain: HashSet<Symbol>,
    solana: HashSet<Symbol>,
    centralized_adapter: Arc<dyn VenueAdapter>,
    onchain_adapter: Arc<dyn VenueAdapter>,
    solana_adapter: Arc<dyn VenueAdapter>,
}

impl VenueRouter {
    pub fn new(
        centralized_perp: Vec<Symbol>,
        onchain: Vec<Symbol>,
        solana: Vec<Symbol>,
        centralized_adapter: Arc<dyn VenueAdapter>,
        onchain_adapter: Arc<dyn VenueAdapter>,
        solana_adapter: Arc<dyn VenueAdapter>,
    ) -> Self {
        Self {
            centralized_perp: centralized_perp.into_iter().collect(),
            onchain: onchain.into_iter().collect(),
            solana: solana.into_iter().collect(),
            centralized_adapter,
            onchain_adapter,
            solana_adapter,
        }
    }

    /// Resolves the adapter for a symbol, honoring an explicit
    /// `venue_hint` override before falling back to universe membership.
    /// Defaults to the centralized-perp adapter when the symbol belongs to
    /// no known universe.
    pub fn resolve(&self, symbol: &Symbol, venue_hint: Option<&str>) -> Arc<dyn VenueAdapter> {
        if let Some(hint) = venue_hint {
            match hint {
                "onchain" => return self.onchain_adapter.clone(),
                "solana" => return self.solana_adapter.clone(),
                "centralized_perp" => return self.centralized_adapter.clone(),
                _ => {}
            }
        }
        if self.onchain.contains(symbol) {
            self.onchain_adapter.clone()
        } else if self.solana.contains(symbol) {
            self.solana_adapter.clone()
        } else {
            self.centralized_adapter.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::adapters::{OnChainAdapter, RestSignedAdapter, SolanaAdapter};

    fn router() -> VenueRouter {
        VenueRouter::new(
            vec!["BTCUSDT".to_string()],
            vec!["MON-USDC".to_string()],
            vec!["JUP-USDC".to_string()],
            Arc::new(RestSignedAdapter::new("k", "s", "https://x.test")),
            Arc::new(OnChainAdapter::new("https://rpc.test")),
            Arc::new(SolanaAdapter::new("https://rpc.test")),
        )
    }

    #[test]
    fn routes_by_universe_membership() {
        let r = router();
        assert_eq!(r.resolve(&"MON-USDC".to_string(), None).name(), "onchain");
        assert_eq!(r.resolve(&"JUP-USDC".to_string(), None).name(), "solana");
        assert_eq!(r.resolve(&"BTCUSDT".to_string(), None).name(), "rest_signed");
    }

    #[test]
    fn override_hint_wins() {
        let r = router();
        assert_eq!(r.resolve(&"BTCUSDT".to_string(), Some("solana")).name(), "solana");
    }

    #[test]
    fn unknown_symbol_defaults_to_centralized() {
        let r = router();
        assert_eq!(r.resolve(&"UNKNOWN".to_string(), None).name(), "rest_signed");
    }
}
