mod datastore;
mod framing;
mod query_agent;
mod types;

pub use datastore::{Datastore, FeederEntry, PairConfig, StoreError};
pub use query_agent::{QueryAgent, QueryClient};
pub use types::{GossipMessage, Transport};
