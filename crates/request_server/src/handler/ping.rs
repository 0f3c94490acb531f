//! Built-in connectivity probe.

use super::{HandlerResult, RequestContext, RequestHandler};
use async_trait::async_trait;
use warden_protocol::{codes, AuthScope, HandlerDescriptor, ParamSet};

/// Declaration of the parameterless ping at `(1, 1)`, callable before
/// authentication and shared by every node type.
pub static PING_DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    category: 1,
    method: 1,
    server_id: 0,
    auth: AuthScope::Unauthenticated,
    params: &[],
    constraints: &[],
};

/// Answers `SUCCESS` with no payload. Exists so clients and load balancers
/// can probe a node without credentials.
pub struct PingHandler {
    params: ParamSet,
}

impl PingHandler {
    pub fn new() -> Box<dyn RequestHandler> {
        Box::new(Self {
            params: ParamSet::for_descriptor(&PING_DESCRIPTOR),
        })
    }
}

#[async_trait]
impl RequestHandler for PingHandler {
    fn descriptor(&self) -> &'static HandlerDescriptor {
        &PING_DESCRIPTOR
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    async fn process(&mut self, _ctx: &mut RequestContext<'_>) -> HandlerResult {
        Ok(codes::SUCCESS)
    }
}
