mod graph;
mod origin;
mod pather;
pub mod types;

pub use graph::{MedianNode, PriceGraph};
pub use origin::{OriginAdaptor, OriginError, OriginSet, SinglePairAdaptor};
pub use pather::PathResolver;
pub use types::AggregateError;
