//! Wire types for gossip and the query agent
use async_trait::async_trait;
use ethers_core::types::Address;
use oracle_price::SignedPrice;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A price gossiped between feeders, the unit the transport carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipMessage {
    pub wat: String,
    pub price: SignedPrice,
}

/// The pub/sub substrate feeders gossip signed prices over. The transport
/// itself (libp2p, a message broker, whatever) is out of scope; this is the
/// seam a `Datastore` subscribes through and a `QueryAgent` publishes
/// through.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn recv(&mut self) -> Option<GossipMessage>;
    async fn send(&self, message: GossipMessage);
}

/// A request frame sent to the query agent
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub params: Value,
}

/// A response frame returned by the query agent
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishParams {
    pub wat: String,
    pub price: SignedPrice,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PullPriceParams {
    pub wat: String,
    pub feeder: Address,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PullPricesParams {
    pub wat: Option<String>,
    pub feeder: Option<Address>,
}
