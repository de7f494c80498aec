//! The signed-price datastore: a concurrent per-pair/per-feeder store fed by
//! gossip
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::Address;
use log::{debug, warn};
use oracle_price::SignedPrice;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{GossipMessage, Transport};

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("feeder {0} is not authorized for {1}")]
    UnknownFeeder(Address, String),
    #[error("price for {0}/{1} is not newer than the stored entry")]
    ReplayOrStale(String, Address),
    #[error("failed to recover a feeder address from the price's signature")]
    BadSignature,
}

#[derive(Clone, Debug)]
pub struct FeederEntry {
    pub signed_price: SignedPrice,
    pub received_at: u64,
    pub from: Address,
}

/// The feeders authorized to publish a given `wat`
#[derive(Clone, Debug, Default)]
pub struct PairConfig {
    pub feeds: HashSet<Address>,
}

/// `wat` -> feeder address -> latest accepted entry
type Store = HashMap<String, HashMap<Address, FeederEntry>>;

pub struct Datastore {
    store: RwLock<Store>,
    pairs: HashMap<String, PairConfig>,
    expiry: Duration,
}

impl Datastore {
    /// `expiry` bounds how long a feeder entry is served after it is
    /// received; an entry older than that is treated as absent by readers
    /// even if no newer entry from that feeder has arrived to replace it.
    pub fn new(pairs: HashMap<String, PairConfig>, expiry: Duration) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            pairs,
            expiry,
        }
    }

    fn is_expired(&self, entry: &FeederEntry) -> bool {
        now_secs().saturating_sub(entry.received_at) > self.expiry.as_secs()
    }

    /// Spawn the dedicated subscription task that drains `transport` and
    /// upserts accepted prices. Signature recovery happens before the write
    /// lock is taken, so readers are never blocked on cryptography.
    pub fn spawn_subscriber(self: Arc<Self>, mut transport: Box<dyn Transport>) {
        tokio::spawn(async move {
            while let Some(message) = transport.recv().await {
                if let Err(err) = self.handle_message(message).await {
                    warn!("rejected gossiped price: {err}");
                }
            }
            debug!("datastore subscriber exiting: transport closed");
        });
    }

    pub async fn handle_message(&self, message: GossipMessage) -> Result<(), StoreError> {
        let from = message
            .price
            .recover()
            .map_err(|_| StoreError::BadSignature)?;

        // The signature binds `from` to `message.price.wat` (it's part of
        // the hashed pre-image), so that's the only `wat` this message can
        // be authorized or stored under — not the envelope's own `wat`,
        // which a relaying peer could set to anything.
        let wat = &message.price.wat;

        let config = self
            .pairs
            .get(wat)
            .ok_or_else(|| StoreError::UnknownFeeder(from, wat.clone()))?;
        if !config.feeds.contains(&from) {
            return Err(StoreError::UnknownFeeder(from, wat.clone()));
        }

        let mut store = self.store.write().await;
        let feeders = store.entry(wat.clone()).or_default();
        if let Some(existing) = feeders.get(&from) {
            if message.price.age <= existing.signed_price.age {
                return Err(StoreError::ReplayOrStale(wat.clone(), from));
            }
        }
        let received_at = now_secs();
        feeders.insert(
            from,
            FeederEntry {
                signed_price: message.price,
                received_at,
                from,
            },
        );
        Ok(())
    }

    pub async fn by_pair(&self, wat: &str) -> Vec<FeederEntry> {
        let store = self.store.read().await;
        store
            .get(wat)
            .map(|feeders| {
                feeders
                    .values()
                    .filter(|entry| !self.is_expired(entry))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn by_feeder(&self, feeder: Address) -> Vec<FeederEntry> {
        let store = self.store.read().await;
        store
            .values()
            .filter_map(|feeders| feeders.get(&feeder).cloned())
            .filter(|entry| !self.is_expired(entry))
            .collect()
    }

    pub async fn by_pair_and_feeder(&self, wat: &str, feeder: Address) -> Option<FeederEntry> {
        let store = self.store.read().await;
        let entry = store.get(wat)?.get(&feeder)?;
        if self.is_expired(entry) {
            None
        } else {
            Some(entry.clone())
        }
    }
}
