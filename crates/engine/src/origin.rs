//! Origin adaptors: the boundary between an external price source and a `Tick`
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, warn};
use thiserror::Error;
use tokio::time::timeout;

use crate::types::{Pair, Tick};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OriginError {
    #[error("origin returned no response")]
    EmptyOriginResponse,
    #[error("origin response had an invalid status: {0}")]
    InvalidResponseStatus(u16),
    #[error("failed to parse origin response: {0}")]
    ParseFailure(String),
    #[error("origin response is missing pair {0}")]
    MissingResponseForPair(Pair),
    #[error("unknown origin: {0}")]
    UnknownOrigin(String),
    #[error("origin fetch timed out")]
    Timeout,
}

/// A price source capable of fetching a batch of pairs in one round trip.
///
/// Implementors reach an external collaborator (an HTTP worker pool) to do
/// the actual network call; that collaborator is injected, never owned, so
/// adaptors stay testable without a live network.
#[async_trait]
pub trait OriginAdaptor: Send + Sync {
    async fn fetch(&self, pairs: &[Pair]) -> Vec<Result<Tick, OriginError>>;
}

/// Many origins only ever quote one pair per call (e.g. a venue with one
/// ticker endpoint per market). Implementing this instead of `OriginAdaptor`
/// gets a batched `fetch` for free via the blanket impl below.
#[async_trait]
pub trait SinglePairAdaptor: Send + Sync {
    async fn fetch_one(&self, pair: Pair) -> Result<Tick, OriginError>;
}

#[async_trait]
impl<T: SinglePairAdaptor> OriginAdaptor for T {
    async fn fetch(&self, pairs: &[Pair]) -> Vec<Result<Tick, OriginError>> {
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            out.push(self.fetch_one(*pair).await);
        }
        out
    }
}

/// Fans a batch of per-origin pair requests out to the matching adaptors,
/// one task per origin, and collates the results back into a per-origin map.
///
/// An origin name with no registered adaptor is not an error for the whole
/// batch: every pair requested of it fails individually with
/// `OriginError::UnknownOrigin`, the same way a single bad venue name
/// shouldn't sink every other venue's fetch.
pub struct OriginSet {
    adaptors: HashMap<String, Box<dyn OriginAdaptor>>,
}

impl OriginSet {
    pub fn new() -> Self {
        Self {
            adaptors: HashMap::new(),
        }
    }

    pub fn register(&mut self, origin: impl Into<String>, adaptor: Box<dyn OriginAdaptor>) {
        self.adaptors.insert(origin.into(), adaptor);
    }

    /// Fetch `requests` (origin name -> pairs to fetch from it), with an
    /// optional deadline. On deadline expiry, any origin still in flight is
    /// abandoned and every pair requested of it becomes `OriginError::Timeout`.
    pub async fn fetch(
        &self,
        requests: HashMap<String, Vec<Pair>>,
        deadline: Option<Duration>,
    ) -> HashMap<String, Vec<Result<Tick, OriginError>>> {
        let mut results = HashMap::with_capacity(requests.len());
        let mut pending = Vec::with_capacity(requests.len());

        for (origin, pairs) in requests {
            match self.adaptors.get(&origin) {
                Some(adaptor) => pending.push((origin, pairs.len(), adaptor.fetch(&pairs))),
                None => {
                    warn!("unknown origin requested: {origin}");
                    let errs = vec![Err(OriginError::UnknownOrigin(origin.clone())); pairs.len()];
                    results.insert(origin, errs);
                }
            }
        }

        let joined = futures::future::join_all(pending.into_iter().map(|(origin, n, fut)| {
            async move {
                let outcome = match deadline {
                    Some(d) => match timeout(d, fut).await {
                        Ok(v) => v,
                        Err(_) => {
                            error!("origin '{origin}' timed out");
                            vec![Err(OriginError::Timeout); n]
                        }
                    },
                    None => fut.await,
                };
                (origin, outcome)
            }
        }))
        .await;

        for (origin, outcome) in joined {
            results.insert(origin, outcome);
        }
        results
    }
}

impl Default for OriginSet {
    fn default() -> Self {
        Self::new()
    }
}
