use async_trait::async_trait;

use crate::{
    context::InboundRequest,
    error::GuardResult,
    guard::GuardEngine,
    middleware::{ControlFlow, GatewayMiddleware},
};

/// Runs the decision engine for every request outside the public paths.
pub struct DecisionGuardMiddleware {
    engine: GuardEngine,
    public_prefixes: Vec<String>,
}

impl DecisionGuardMiddleware {
    pub fn new(engine: GuardEngine, public_prefixes: Vec<String>) -> Self {
        Self {
            engine,
            public_prefixes,
        }
    }

    fn is_public_path(&self, path: &str) -> bool {
        self.public_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[async_trait]
impl GatewayMiddleware for DecisionGuardMiddleware {
    fn name(&self) -> &'static str {
        "decision-guard"
    }

    async fn on_request(&self, req: &mut InboundRequest) -> GuardResult<ControlFlow> {
        if self.is_public_path(req.uri.path()) {
            req.decision_source = Some("public");
            return Ok(ControlFlow::Continue);
        }

        Ok(self.engine.evaluate(req).await)
    }
}
