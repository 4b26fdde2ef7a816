pub mod guard;
pub mod logging;

use async_trait::async_trait;
use axum::{
    body::Body,
    response::Response,
};

use crate::{
    context::InboundRequest,
    error::GuardResult,
};

pub use crate::guard::dispatch::ControlFlow;

#[async_trait]
pub trait GatewayMiddleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_request(&self, req: &mut InboundRequest) -> GuardResult<ControlFlow>;

    async fn on_response(
        &self,
        _req: &InboundRequest,
        _response: &mut Response<Body>,
    ) -> GuardResult<()> {
        Ok(())
    }
}
