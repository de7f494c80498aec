//! The query agent: a length-prefixed JSON-over-TCP front to a `Datastore`
use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::Address;
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::datastore::Datastore;
use crate::framing::{read_frame, write_frame, FramingError};
use crate::types::{GossipMessage, PublishParams, PullPriceParams, PullPricesParams, Request, Response, Transport};

/// How long `serve` waits for in-flight connections to finish on their own
/// once shutdown is requested, before aborting whatever is left.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct QueryAgent {
    datastore: Arc<Datastore>,
    transport: Arc<dyn Transport>,
    listener: TcpListener,
    shutdown: watch::Sender<bool>,
    shutdown_grace: Duration,
}

impl QueryAgent {
    pub async fn bind(
        addr: &str,
        datastore: Arc<Datastore>,
        transport: Arc<dyn Transport>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            datastore,
            transport,
            listener,
            shutdown,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Override the default grace period `serve` allows in-flight requests
    /// to finish in once shutdown is requested.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is requested, then stop accepting
    /// new ones and give outstanding connections up to `shutdown_grace` to
    /// finish their current request before the remainder are aborted.
    pub async fn serve(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("query agent shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("query agent accepted connection from {peer}");
                            let datastore = self.datastore.clone();
                            let transport = self.transport.clone();
                            connections.spawn(handle_connection(stream, datastore, transport));
                        }
                        Err(err) => error!("query agent accept error: {err}"),
                    }
                }
            }
        }

        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                "query agent shutdown grace period elapsed with {} connection(s) still open, aborting",
                connections.len()
            );
            connections.shutdown().await;
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn handle_connection(mut stream: TcpStream, datastore: Arc<Datastore>, transport: Arc<dyn Transport>) {
    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(req) => req,
            Err(FramingError::Closed) => return,
            Err(err) => {
                error!("query agent read error: {err}");
                return;
            }
        };

        let response = dispatch(&request, &datastore, &transport).await;
        if write_frame(&mut stream, &response).await.is_err() {
            return;
        }
    }
}

async fn dispatch(request: &Request, datastore: &Datastore, transport: &Arc<dyn Transport>) -> Response {
    match request.method.as_str() {
        "publish" => {
            let params: PublishParams = match serde_json::from_value(request.params.clone()) {
                Ok(p) => p,
                Err(err) => return Response::err(err.to_string()),
            };
            transport
                .send(GossipMessage {
                    wat: params.wat,
                    price: params.price,
                })
                .await;
            Response::ok(json!(null))
        }
        "pull" => {
            let params: PullPriceParams = match serde_json::from_value(request.params.clone()) {
                Ok(p) => p,
                Err(err) => return Response::err(err.to_string()),
            };
            match datastore.by_pair_and_feeder(&params.wat, params.feeder).await {
                Some(entry) => Response::ok(json!(entry.signed_price)),
                None => Response::ok(json!(null)),
            }
        }
        "pullAll" => {
            let params: PullPricesParams = match serde_json::from_value(request.params.clone()) {
                Ok(p) => p,
                Err(err) => return Response::err(err.to_string()),
            };
            let entries = match (params.wat, params.feeder) {
                (Some(wat), None) => datastore.by_pair(&wat).await,
                (None, Some(feeder)) => datastore.by_feeder(feeder).await,
                (Some(wat), Some(feeder)) => datastore
                    .by_pair_and_feeder(&wat, feeder)
                    .await
                    .into_iter()
                    .collect(),
                (None, None) => Vec::new(),
            };
            let prices: Vec<_> = entries.into_iter().map(|e| e.signed_price).collect();
            Response::ok(json!(prices))
        }
        other => Response::err(format!("unknown method: {other}")),
    }
}

/// A thin client for the same framing, the `Spire`-equivalent
pub struct QueryClient {
    stream: TcpStream,
}

impl QueryClient {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    async fn call(&mut self, method: &str, params: serde_json::Value) -> Result<Response, FramingError> {
        write_frame(
            &mut self.stream,
            &Request {
                method: method.to_string(),
                params,
            },
        )
        .await?;
        read_frame(&mut self.stream).await
    }

    pub async fn publish_price(
        &mut self,
        wat: impl Into<String>,
        price: oracle_price::SignedPrice,
    ) -> Result<(), FramingError> {
        self.call("publish", json!(PublishParams { wat: wat.into(), price }))
            .await?;
        Ok(())
    }

    pub async fn pull_price(
        &mut self,
        wat: impl Into<String>,
        feeder: Address,
    ) -> Result<Option<oracle_price::SignedPrice>, FramingError> {
        let response = self
            .call("pull", json!(PullPriceParams { wat: wat.into(), feeder }))
            .await?;
        Ok(response
            .result
            .and_then(|v| serde_json::from_value(v).ok()))
    }

    pub async fn pull_prices(
        &mut self,
        wat: Option<String>,
        feeder: Option<Address>,
    ) -> Result<Vec<oracle_price::SignedPrice>, FramingError> {
        let response = self.call("pullAll", json!(PullPricesParams { wat, feeder })).await?;
        Ok(response
            .result
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }
}
