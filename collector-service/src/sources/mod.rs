pub mod consumption_payload;
pub mod poll;
pub mod portal_client;

pub use consumption_payload::{decode_reading, ConsumptionPayload};
pub use poll::{PollBatch, PortalPollSource};
pub use portal_client::{HttpPortalClient, PortalClient, PortalError};
