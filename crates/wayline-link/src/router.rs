use time::OffsetDateTime;
use tracing::{info, warn};

use wayline_nav::NavigationHandle;
use wayline_proto::{MessageType, RequestEnvelope};

use crate::frame::Reply;
use crate::handler::{navigation, settings, status};

/// Maps one raw request to exactly one reply. Never panics on input; every
/// failure becomes `Reply::Err`.
#[derive(Clone)]
pub struct Router {
    nav: NavigationHandle,
}

impl Router {
    pub fn new(nav: NavigationHandle) -> Self {
        Self { nav }
    }

    pub fn navigation(&self) -> &NavigationHandle {
        &self.nav
    }

    /// Blocking: navigation and settings requests may wait on the vehicle.
    pub fn route(&self, raw: &[u8]) -> Reply {
        let env = match RequestEnvelope::parse(raw) {
            Ok(env) => env,
            Err(e) => {
                warn!("router: rejected request: {}", e);
                return Reply::Err;
            }
        };
        self.dispatch(&env)
    }

    pub fn dispatch(&self, env: &RequestEnvelope) -> Reply {
        let what = env.message.describe();
        if env.message_type == MessageType::Status && what == "heartbeat" {
            tracing::trace!("router: heartbeat request");
        } else {
            info!("router: {} {}", env.message_type, what);
        }

        let out = match env.message_type {
            MessageType::Navigation => navigation::handle(&self.nav, env),
            MessageType::Status => status::handle(&self.nav, env, OffsetDateTime::now_utc()),
            MessageType::Settings => settings::handle(&self.nav, env),
        };
        out.unwrap_or_else(|e| {
            warn!("router: {} {} failed: {:#}", env.message_type, what, e);
            Reply::Err
        })
    }
}
