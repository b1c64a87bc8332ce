//! Workstation link: framed TCP requests in, status codes out, plus the
//! heartbeat push back to the workstation, and the UDP hello that lets a
//! workstation find us.

pub mod discovery;
pub mod doctor;
pub mod frame;
pub mod handler;
pub mod heartbeat;
pub mod router;
pub mod server;

pub use discovery::DiscoveryConfig;
pub use frame::{read_frame, read_reply, write_frame, write_reply, Reply};
pub use heartbeat::{Heartbeat, HeartbeatConfig};
pub use router::Router;
pub use server::{Server, ServerConfig};
