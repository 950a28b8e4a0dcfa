use std::sync::Arc;

use crate::bridge::upstream::UpstreamConnector;
use crate::config::Config;
use crate::gate::RequestShapingGate;
use crate::proxy::PassThroughClient;

/// Shared application state handed to every handler and middleware.
///
/// Cloning is cheap; all members sit behind `Arc`.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub gate: Arc<RequestShapingGate>,
    pub upstream: Arc<PassThroughClient>,
    pub connector: Arc<dyn UpstreamConnector>,
}

impl AppContext {
    pub fn new(
        config: Config,
        gate: RequestShapingGate,
        upstream: PassThroughClient,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            upstream: Arc::new(upstream),
            connector,
        }
    }
}
