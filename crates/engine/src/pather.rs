//! Resolves a target pair into the set of price paths that can synthesize it
use std::collections::{HashMap, HashSet};

use crate::types::{Pair, PotentialPricePoint, PricePath};

/// A curated table of pair -> paths, built once at startup.
///
/// Loading this table from a configuration file is out of scope here; the
/// resolver only holds whatever table its caller hands it.
pub struct PathResolver {
    paths: HashMap<Pair, Vec<PricePath>>,
}

impl PathResolver {
    pub fn new(paths: HashMap<Pair, Vec<PricePath>>) -> Self {
        Self { paths }
    }

    /// Every target pair this resolver knows how to price
    pub fn pairs(&self) -> impl Iterator<Item = Pair> + '_ {
        self.paths.keys().copied()
    }

    /// The paths that can synthesize `target`. An empty slice means `target`
    /// is not supported.
    pub fn paths(&self, target: Pair) -> &[PricePath] {
        self.paths.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `true` if `target` is known to this resolver at all, even if it
    /// currently has no ticks (distinguishes "unsupported pair" from
    /// "supported pair, no data yet").
    pub fn supports(&self, target: Pair) -> bool {
        self.paths.contains_key(&target)
    }

    /// Drop any path that references a pair with no matching
    /// `PotentialPricePoint`, and return the surviving paths together with
    /// the `PotentialPricePoint`s they actually reference.
    pub fn filter_potential_price_points(
        &self,
        paths: &[PricePath],
        ppps: &[PotentialPricePoint],
    ) -> (Vec<PricePath>, Vec<PotentialPricePoint>) {
        let mut by_pair: HashMap<Pair, Vec<PotentialPricePoint>> = HashMap::new();
        for ppp in ppps {
            by_pair.entry(ppp.pair).or_default().push(*ppp);
        }

        let mut surviving_paths = Vec::new();
        let mut used_pairs = HashSet::new();

        for path in paths {
            if path.pairs().all(|pair| by_pair.contains_key(&pair)) {
                for pair in path.pairs() {
                    used_pairs.insert(pair);
                }
                surviving_paths.push(path.clone());
            }
        }

        let surviving_ppps = used_pairs
            .into_iter()
            .flat_map(|pair| by_pair.remove(&pair).unwrap_or_default())
            .collect();

        (surviving_paths, surviving_ppps)
    }
}
