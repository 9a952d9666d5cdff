pub mod config;
pub mod http_api;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod state_store;
pub mod transform;

pub use pipeline::{Envelope, Pipeline};
