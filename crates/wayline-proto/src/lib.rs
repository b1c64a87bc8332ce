pub mod codes;
pub mod envelope;
pub mod geo;
pub mod status;

pub use codes::MessageCode;
pub use envelope::{KeyValue, Message, MessageType, ProtocolError, RequestEnvelope};
pub use geo::{Location, WayPoint, HOME_ORDER};
