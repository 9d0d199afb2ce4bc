use crate::error::AggregatorError;
use crate::models::{Quote, RebalancerId, Selection};
use crate::quote_source::QuoteSource;
use alloy_primitives::U256;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Picks the rebalancer with the best current quote.
pub struct RebalancerSelector {
    sources: Vec<Arc<dyn QuoteSource>>,
    default_rebalancer: RebalancerId,
}

impl RebalancerSelector {
    pub fn new(sources: Vec<Arc<dyn QuoteSource>>, default_rebalancer: RebalancerId) -> Self {
        Self {
            sources,
            default_rebalancer,
        }
    }

    pub fn default_rebalancer(&self) -> RebalancerId {
        self.default_rebalancer
    }

    /// Query every source and pick the best valid quote.
    ///
    /// Each source runs in its own task; one that panics counts as an invalid
    /// quote for its rebalancer. Never fails.
    pub async fn select_best(&self) -> Selection {
        let quotes = self.fetch_all().await;
        let selection = pick_best(&quotes, self.default_rebalancer);

        if selection.degraded {
            warn!(
                "{}; falling back to default rebalancer {}",
                AggregatorError::NoValidQuotes,
                selection.rebalancer_id
            );
        } else {
            info!(
                "Best quote of {} is from {}",
                selection.quote, selection.rebalancer_id
            );
        }

        selection
    }

    async fn fetch_all(&self) -> Vec<Quote> {
        let handles = self.sources.iter().map(|source| {
            let rebalancer_id = source.rebalancer_id();
            let source = Arc::clone(source);
            (rebalancer_id, tokio::spawn(async move { source.fetch().await }))
        });

        let (ids, tasks): (Vec<_>, Vec<_>) = handles.unzip();

        join_all(tasks)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, rebalancer_id)| match joined {
                Ok(quote) => quote,
                Err(e) => {
                    error!("Quote source for {} aborted: {}", rebalancer_id, e);
                    Quote::invalid(rebalancer_id)
                }
            })
            .collect()
    }
}

/// Best-quote rule: strictly greatest value among valid quotes, ties to the
/// lower rebalancer ordinal. No valid quotes selects `default` at zero.
pub fn pick_best(quotes: &[Quote], default: RebalancerId) -> Selection {
    quotes
        .iter()
        .filter(|q| q.valid)
        .max_by(|a, b| {
            a.value
                .cmp(&b.value)
                .then_with(|| b.rebalancer_id.cmp(&a.rebalancer_id))
        })
        .map(|best| Selection {
            rebalancer_id: best.rebalancer_id,
            quote: best.value,
            degraded: false,
        })
        .unwrap_or(Selection {
            rebalancer_id: default,
            quote: U256::ZERO,
            degraded: true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_goes_to_lower_ordinal_regardless_of_order() {
        let quotes = vec![
            Quote::valid(RebalancerId::Charm, U256::from(50)),
            Quote::valid(RebalancerId::Visor, U256::from(50)),
        ];
        let selection = pick_best(&quotes, RebalancerId::Charm);
        assert_eq!(selection.rebalancer_id, RebalancerId::Visor);
        assert_eq!(selection.quote, U256::from(50));
        assert!(!selection.degraded);
    }

    #[test]
    fn invalid_quote_never_wins_even_with_larger_value() {
        let mut bogus = Quote::invalid(RebalancerId::Visor);
        bogus.value = U256::MAX;
        let quotes = vec![bogus, Quote::valid(RebalancerId::Charm, U256::from(1))];
        let selection = pick_best(&quotes, RebalancerId::Visor);
        assert_eq!(selection.rebalancer_id, RebalancerId::Charm);
        assert_eq!(selection.quote, U256::from(1));
    }

    #[test]
    fn zero_valued_quote_still_beats_fallback() {
        let quotes = vec![Quote::valid(RebalancerId::Charm, U256::ZERO)];
        let selection = pick_best(&quotes, RebalancerId::Visor);
        assert_eq!(selection.rebalancer_id, RebalancerId::Charm);
        assert!(!selection.degraded);
    }
}
