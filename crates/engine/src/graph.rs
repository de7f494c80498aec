//! The aggregation graph: routes a target pair through intermediate pairs,
//! fans out to whatever origin ticks have arrived, and reduces them to a
//! single price.
//!
//! Three reducer shapes compose the graph, mirroring the conceptual nodes of
//! the pipeline:
//!
//! - [`MedianNode`] is the only persistent state: one per pair that has ever
//!   received a tick, deduping by origin and medianing the survivors. It is
//!   also the only reducer that is ever a *leaf* of the returned
//!   [`AggregatedPrice`] tree.
//! - a *trade* reduction walks one [`PricePath`]'s legs, multiplying through
//!   each hop's price (inverted where the leg requires it), with each leg's
//!   own [`AggregatedPrice`] recorded as a child.
//! - an *indirect median* reduction runs every path for a target pair
//!   through a trade reduction and medians the results, recording each
//!   trade's [`AggregatedPrice`] as a child.
//!
//! Trade and indirect-median reductions are not stored: they are recomputed
//! from the current `MedianNode` leaves on every [`PriceGraph::aggregate`]
//! call, memoized only for the duration of that one call so a leaf shared by
//! two paths isn't recomputed twice in the same traversal.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::pather::PathResolver;
use crate::types::{AggregateError, AggregatedPrice, Operation, Pair, PricePath, Tick};

/// Per-pair leaf: the newest tick from each origin, within a freshness window.
pub struct MedianNode {
    time_window: Duration,
    by_origin: HashMap<&'static str, Tick>,
}

impl MedianNode {
    pub fn new(time_window: Duration) -> Self {
        Self {
            time_window,
            by_origin: HashMap::new(),
        }
    }

    /// Keep the newest tick per origin. On an exact timestamp tie, the
    /// tick ingested later wins (arrival order breaks the tie).
    pub fn ingest(&mut self, tick: Tick) {
        match self.by_origin.get(tick.source) {
            Some(existing) if existing.timestamp > tick.timestamp => {}
            _ => {
                self.by_origin.insert(tick.source, tick);
            }
        }
    }

    /// Aggregate this leaf as of `now`. `Empty` (nothing ever ingested) and
    /// `Stale` (everything ingested is outside the window) both report a
    /// zero price with no model-level failure; `Stale` additionally attaches
    /// an informational [`AggregateError::StaleTick`] since there was data,
    /// it just aged out.
    fn aggregate(&self, pair: Pair, now: i64) -> AggregatedPrice {
        let fresh: Vec<&Tick> = self
            .by_origin
            .values()
            .filter(|t| {
                let age = now - t.timestamp;
                age >= 0 && age as u64 <= self.time_window.as_secs()
            })
            .collect();

        if fresh.is_empty() {
            let mut node = AggregatedPrice::zero(pair, "median", now);
            if !self.by_origin.is_empty() {
                node.errors.push(AggregateError::StaleTick(pair));
            }
            return node;
        }

        let nonzero: Vec<f64> = fresh.iter().map(|t| t.price).filter(|p| *p != 0.0).collect();
        let mut chosen = if nonzero.is_empty() {
            fresh.iter().map(|t| t.price).collect()
        } else {
            nonzero
        };
        chosen.sort_by(f64::total_cmp);

        AggregatedPrice {
            pair,
            price: median(&chosen),
            model: "median",
            children: Vec::new(),
            timestamp: now,
            errors: Vec::new(),
        }
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// The `PathWithDefaultTrade` dispatcher: grows lazily on `ingest`, recomputes
/// from scratch on every `aggregate` call.
pub struct PriceGraph {
    leaves: RwLock<HashMap<Pair, MedianNode>>,
    resolver: PathResolver,
    time_window: Duration,
}

impl PriceGraph {
    pub fn new(resolver: PathResolver, time_window: Duration) -> Self {
        Self {
            leaves: RwLock::new(HashMap::new()),
            resolver,
            time_window,
        }
    }

    /// Route a tick to (creating, if absent) the leaf for its pair.
    pub fn ingest(&self, tick: Tick) {
        let mut leaves = self.leaves.write().expect("leaves lock poisoned");
        leaves
            .entry(tick.pair)
            .or_insert_with(|| MedianNode::new(self.time_window))
            .ingest(tick);
    }

    /// Aggregate `target` using the current wall-clock time as the freshness
    /// reference.
    pub fn aggregate(&self, target: Pair) -> Option<AggregatedPrice> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs() as i64;
        self.aggregate_at(target, now)
    }

    /// Aggregate `target` as of an explicit unix-seconds `now` (the knob
    /// tests use to control freshness without a live clock).
    pub fn aggregate_at(&self, target: Pair, now: i64) -> Option<AggregatedPrice> {
        if !self.resolver.supports(target) {
            return None;
        }
        let mut memo = HashMap::new();
        Some(self.indirect_median(target, now, &mut memo))
    }

    /// Resolve a single pair's aggregated node, whether it's a leaf (has
    /// received ticks directly) or synthetic (reachable only through the
    /// resolver's paths), memoizing within this call so a leaf referenced by
    /// several paths is computed once. A pair that is neither a leaf nor
    /// known to the resolver resolves to a zero-priced node carrying
    /// [`AggregateError::NoPathAvailable`] rather than aborting the caller's
    /// trade, per the "trade yields price 0" rule.
    fn resolve_pair(&self, pair: Pair, now: i64, memo: &mut HashMap<Pair, AggregatedPrice>) -> AggregatedPrice {
        if let Some(cached) = memo.get(&pair) {
            return cached.clone();
        }

        let leaf = {
            let leaves = self.leaves.read().expect("leaves lock poisoned");
            leaves.get(&pair).map(|node| node.aggregate(pair, now))
        };

        let node = if let Some(leaf) = leaf {
            leaf
        } else if self.resolver.supports(pair) {
            self.indirect_median(pair, now, memo)
        } else {
            let mut node = AggregatedPrice::zero(pair, "median", now);
            node.errors.push(AggregateError::NoPathAvailable(pair));
            node
        };

        memo.insert(pair, node.clone());
        node
    }

    /// Run every configured path for `pair` through a trade reduction and
    /// median the resulting prices (zero-prices excluded unless every
    /// surviving trade is zero). Zero configured paths is the "known pair,
    /// no ticks" case: a zero-priced node with an empty child set.
    fn indirect_median(&self, pair: Pair, now: i64, memo: &mut HashMap<Pair, AggregatedPrice>) -> AggregatedPrice {
        let paths = self.resolver.paths(pair);
        let children: Vec<AggregatedPrice> = paths
            .iter()
            .map(|path| self.trade(pair, path, now, memo))
            .collect();

        let prices: Vec<f64> = children.iter().map(|c| c.price).collect();
        let price = if prices.is_empty() {
            0.0
        } else {
            let nonzero: Vec<f64> = prices.iter().copied().filter(|p| *p != 0.0).collect();
            let mut chosen = if nonzero.is_empty() { prices } else { nonzero };
            chosen.sort_by(f64::total_cmp);
            median(&chosen)
        };

        let errors = children.iter().flat_map(|c| c.all_errors()).collect();

        AggregatedPrice {
            pair,
            price,
            model: "indirect-median",
            children,
            timestamp: now,
            errors,
        }
    }

    /// Walk one path's legs, multiplying the running product by each hop's
    /// resolved price (or its reciprocal, for an `Invert` leg), recording
    /// every leg's node as a child. Any missing or zero-priced leg short
    /// circuits the whole trade to price `0`, but the trade is always
    /// produced (never dropped) so it still participates in the parent's
    /// indirect median.
    fn trade(
        &self,
        target: Pair,
        path: &PricePath,
        now: i64,
        memo: &mut HashMap<Pair, AggregatedPrice>,
    ) -> AggregatedPrice {
        let children: Vec<AggregatedPrice> = path
            .legs
            .iter()
            .map(|leg| self.resolve_pair(leg.pair, now, memo))
            .collect();

        let mut price = 1.0;
        let mut zeroed = false;
        for (leg, child) in path.legs.iter().zip(&children) {
            if child.price == 0.0 {
                zeroed = true;
                break;
            }
            price *= match leg.op {
                Operation::Cross => child.price,
                Operation::Invert => 1.0 / child.price,
            };
        }
        if zeroed {
            price = 0.0;
        }

        let errors = children.iter().flat_map(|c| c.all_errors()).collect();

        AggregatedPrice {
            pair: target,
            price,
            model: "trade",
            children,
            timestamp: now,
            errors,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::PriceLeg;
    use std::collections::HashMap as Map;

    fn tick(base: &'static str, quote: &'static str, price: f64, ts: i64, source: &'static str) -> Tick {
        Tick {
            pair: Pair::new(base, quote),
            price,
            bid: price,
            ask: price,
            volume: 1.0,
            timestamp: ts,
            source,
        }
    }

    fn leg(base: &'static str, quote: &'static str, op: Operation) -> PriceLeg {
        PriceLeg {
            pair: Pair::new(base, quote),
            op,
        }
    }

    /// Builds the same path table as the reference aggregator test fixture:
    /// ETH/BTC and BTC/USD are direct; ETH/USD, ETH/KRW is unsupported, and
    /// REP/USD is supported but receives no ticks.
    fn fixture_graph() -> PriceGraph {
        let mut paths: HashMap<Pair, Vec<PricePath>> = Map::new();
        paths.insert(
            Pair::new("ETH", "BTC"),
            vec![PricePath::new(vec![leg("ETH", "BTC", Operation::Cross)])],
        );
        paths.insert(
            Pair::new("BTC", "USD"),
            vec![PricePath::new(vec![leg("BTC", "USD", Operation::Cross)])],
        );
        paths.insert(
            Pair::new("ETH", "USD"),
            vec![PricePath::new(vec![
                leg("ETH", "BTC", Operation::Cross),
                leg("BTC", "USD", Operation::Cross),
            ])],
        );
        paths.insert(Pair::new("REP", "USD"), vec![]);

        let resolver = PathResolver::new(paths);
        PriceGraph::new(resolver, Duration::from_secs(600))
    }

    #[test]
    fn direct_pair_aggregates_to_median_of_origins() {
        let graph = fixture_graph();
        graph.ingest(tick("ETH", "BTC", 2.0, 1_000, "a"));
        graph.ingest(tick("ETH", "BTC", 4.0, 1_000, "b"));
        graph.ingest(tick("ETH", "BTC", 3.0, 1_000, "c"));

        let result = graph.aggregate_at(Pair::new("ETH", "BTC"), 1_000).unwrap();
        assert_eq!(result.price, 3.0);
        assert_eq!(result.model, "indirect-median");
        // one Trade child wrapping the single-leg path, wrapping one Median leaf
        assert_eq!(result.children.len(), 1);
        assert_eq!(result.children[0].model, "trade");
        assert_eq!(result.children[0].children.len(), 1);
        assert_eq!(result.children[0].children[0].model, "median");
        assert_eq!(result.children[0].children[0].price, 3.0);
    }

    #[test]
    fn indirect_pair_chains_through_intermediate() {
        let graph = fixture_graph();
        graph.ingest(tick("ETH", "BTC", 3.0, 1_000, "a"));
        graph.ingest(tick("BTC", "USD", 4.0, 1_000, "a"));

        let result = graph.aggregate_at(Pair::new("ETH", "USD"), 1_000).unwrap();
        assert_eq!(result.price, 12.0);
        assert_eq!(result.children[0].children.len(), 2);
    }

    #[test]
    fn unsupported_pair_returns_none() {
        let graph = fixture_graph();
        assert!(graph.aggregate_at(Pair::new("ETH", "KRW"), 1_000).is_none());
    }

    #[test]
    fn supported_pair_with_no_ticks_returns_zero() {
        let graph = fixture_graph();
        let result = graph.aggregate_at(Pair::new("REP", "USD"), 1_000).unwrap();
        assert_eq!(result.price, 0.0);
        assert_eq!(result.model, "indirect-median");
        assert!(result.children.is_empty());
    }

    #[test]
    fn stale_ticks_are_excluded() {
        let graph = fixture_graph();
        graph.ingest(tick("ETH", "BTC", 3.0, 0, "a"));
        // 10_000s later is well outside the 600s window
        let result = graph.aggregate_at(Pair::new("ETH", "BTC"), 10_000).unwrap();
        assert_eq!(result.price, 0.0);
        assert!(result
            .all_errors()
            .iter()
            .any(|e| matches!(e, AggregateError::StaleTick(_))));
    }

    #[test]
    fn newest_tick_per_origin_wins() {
        let graph = fixture_graph();
        graph.ingest(tick("ETH", "BTC", 2.0, 500, "a"));
        graph.ingest(tick("ETH", "BTC", 9.0, 900, "a"));
        let result = graph.aggregate_at(Pair::new("ETH", "BTC"), 900).unwrap();
        assert_eq!(result.price, 9.0);
    }

    #[test]
    fn zero_price_propagates_through_trade() {
        let graph = fixture_graph();
        graph.ingest(tick("ETH", "BTC", 0.0, 1_000, "a"));
        graph.ingest(tick("BTC", "USD", 4.0, 1_000, "a"));
        let result = graph.aggregate_at(Pair::new("ETH", "USD"), 1_000).unwrap();
        assert_eq!(result.price, 0.0);
    }

    #[test]
    fn repeated_aggregation_without_new_ingests_is_deterministic() {
        let graph = fixture_graph();
        graph.ingest(tick("ETH", "BTC", 3.0, 1_000, "a"));
        graph.ingest(tick("BTC", "USD", 5.0, 1_000, "a"));
        let first = graph.aggregate_at(Pair::new("ETH", "USD"), 1_000).unwrap();
        let second = graph.aggregate_at(Pair::new("ETH", "USD"), 1_000).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_leg_zeroes_trade_but_does_not_drop_it() {
        // ETH/USD's path needs BTC/USD, which has received nothing and has
        // no path of its own configured in a minimal resolver.
        let mut paths: HashMap<Pair, Vec<PricePath>> = Map::new();
        paths.insert(
            Pair::new("ETH", "USD"),
            vec![PricePath::new(vec![
                leg("ETH", "BTC", Operation::Cross),
                leg("BTC", "USD", Operation::Cross),
            ])],
        );
        let resolver = PathResolver::new(paths);
        let graph = PriceGraph::new(resolver, Duration::from_secs(600));
        graph.ingest(tick("ETH", "BTC", 3.0, 1_000, "a"));

        let result = graph.aggregate_at(Pair::new("ETH", "USD"), 1_000).unwrap();
        assert_eq!(result.price, 0.0);
        assert_eq!(result.children.len(), 1, "the trade is still present, just zeroed");
        assert!(result
            .all_errors()
            .iter()
            .any(|e| matches!(e, AggregateError::NoPathAvailable(_))));
    }

    /// Seed scenario 2 from the aggregation graph's testable properties: a
    /// stale tick is dropped, and an origin's older tick is replaced by its
    /// newer one before the median is taken.
    #[test]
    fn seed_scenario_stale_tick_filtering() {
        let mut paths: HashMap<Pair, Vec<PricePath>> = Map::new();
        paths.insert(
            Pair::new("BTC", "USD"),
            vec![PricePath::new(vec![leg("BTC", "USD", Operation::Cross)])],
        );
        let resolver = PathResolver::new(paths);
        let graph = PriceGraph::new(resolver, Duration::from_secs(1000));

        graph.ingest(tick("BTC", "USD", 1000.0, -1000, "exch0"));
        graph.ingest(tick("BTC", "USD", 2000.0, 1, "exch1"));
        graph.ingest(tick("BTC", "USD", 20.0, 2, "exch2"));
        graph.ingest(tick("BTC", "USD", 3.0, 3, "exch1"));
        graph.ingest(tick("BTC", "USD", 5.0, 5, "exch5"));

        let result = graph.aggregate_at(Pair::new("BTC", "USD"), 5).unwrap();
        assert_eq!(result.price, 5.0);
    }

    /// Seed scenario 3: two independent trade chains (ETH/BTC.BTC/USD and
    /// ETH/USDT.USDT/USD) combine under an indirect median.
    #[test]
    fn seed_scenario_indirect_resolution_across_two_chains() {
        let mut paths: HashMap<Pair, Vec<PricePath>> = Map::new();
        paths.insert(
            Pair::new("ETH", "USD"),
            vec![
                PricePath::new(vec![
                    leg("ETH", "BTC", Operation::Cross),
                    leg("BTC", "USD", Operation::Cross),
                ]),
                PricePath::new(vec![
                    leg("ETH", "USDT", Operation::Cross),
                    leg("USDT", "USD", Operation::Cross),
                ]),
            ],
        );
        let resolver = PathResolver::new(paths);
        let graph = PriceGraph::new(resolver, Duration::from_secs(1000));

        graph.ingest(tick("ETH", "BTC", 3.0, 5, "a"));
        graph.ingest(tick("BTC", "USD", 5.0, 5, "a"));
        graph.ingest(tick("ETH", "USDT", 3.0, 5, "exch1"));
        graph.ingest(tick("USDT", "USD", 3.0, 5, "exch2"));

        let result = graph.aggregate_at(Pair::new("ETH", "USD"), 5).unwrap();
        assert_eq!(result.children.len(), 2);
        let mut trade_prices: Vec<f64> = result.children.iter().map(|c| c.price).collect();
        trade_prices.sort_by(f64::total_cmp);
        assert_eq!(trade_prices, vec![9.0, 15.0]);
        assert_eq!(result.price, 12.0);
    }
}
