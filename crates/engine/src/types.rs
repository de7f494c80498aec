//! Common data types shared across the aggregation pipeline

use std::fmt;

/// A trading pair, e.g. `ETH/USD`
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Pair {
    pub base: &'static str,
    pub quote: &'static str,
}

impl Pair {
    pub fn new(base: &'static str, quote: &'static str) -> Self {
        Self { base, quote }
    }
    /// The inverted pair, `quote/base`
    pub fn invert(&self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// One step in a chain of trades connecting a source pair to a target pair
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operation {
    /// Multiply by the quoted price as-is
    Cross,
    /// Multiply by the reciprocal of the quoted price
    Invert,
}

/// A single price observation for a pair, as returned by an origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub pair: Pair,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    /// unix seconds
    pub timestamp: i64,
    pub source: &'static str,
}

impl Tick {
    /// `true` if this tick carries no usable price (the `price == 0` sentinel)
    pub fn is_empty(&self) -> bool {
        self.price == 0.0
    }
}

/// A request to fetch a single pair from a single origin; the input side of
/// an origin fetch before a `Tick` (or error) comes back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PotentialPricePoint {
    pub origin: &'static str,
    pub pair: Pair,
}

/// One hop of a multi-hop route: the pair to fetch and how to fold its price
/// into the running product.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceLeg {
    pub pair: Pair,
    pub op: Operation,
}

/// An ordered chain of legs that synthesizes a price for a pair that has no
/// direct origin coverage, e.g. `ETH/USD` via `ETH/BTC` and `BTC/USD`.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePath {
    pub legs: Vec<PriceLeg>,
}

impl PricePath {
    pub fn new(legs: Vec<PriceLeg>) -> Self {
        Self { legs }
    }
    /// The pairs this path depends on, in hop order
    pub fn pairs(&self) -> impl Iterator<Item = Pair> + '_ {
        self.legs.iter().map(|leg| leg.pair)
    }
}

/// An error attached to an aggregation node. Informational: aggregators
/// collect these from their children but never fail because of them (see
/// the error-handling propagation policy).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("tick for {0} is outside the freshness window")]
    StaleTick(Pair),
    #[error("no path available for {0}")]
    NoPathAvailable(Pair),
}

/// The result of aggregating one or more ticks/paths into a single price for
/// a target pair. Nodes are produced fresh per request and never mutated
/// after construction; `children` mirrors the DAG of reducers that fed into
/// this value (empty for a leaf `Median` node).
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedPrice {
    pub pair: Pair,
    pub price: f64,
    /// the reducer that produced this value, e.g. `"median"`, `"indirect-median"`
    pub model: &'static str,
    pub children: Vec<AggregatedPrice>,
    /// unix seconds at which this node was computed
    pub timestamp: i64,
    /// errors accumulated from this node and its children; never fatal
    pub errors: Vec<AggregateError>,
}

impl AggregatedPrice {
    pub fn zero(pair: Pair, model: &'static str, timestamp: i64) -> Self {
        Self {
            pair,
            price: 0.0,
            model,
            children: Vec::new(),
            timestamp,
            errors: Vec::new(),
        }
    }

    /// All errors in this node's own set together with every descendant's,
    /// depth-first. Aggregators never fail on a child error; this is the
    /// view a caller inspects instead.
    pub fn all_errors(&self) -> Vec<AggregateError> {
        let mut out = self.errors.clone();
        for child in &self.children {
            out.extend(child.all_errors());
        }
        out
    }
}
