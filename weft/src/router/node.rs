//! The node table: leaf of the addressing tree, fronting one web agent.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::tier::{TierBinding, TierLifecycle, TierPhase};
use crate::uri::Uri;

use super::capability::{AgentRoute, HttpBinding, LinkBinding, Push};
use super::{
    forward_admission, forward_data, forward_provision, forward_scheduling, RouterErr,
    TierContext,
};

/// What a node binding sees of its parent.
pub trait NodeContext: TierContext {
    fn node_uri(&self) -> &Uri;
}

/// A bound node tier. Delivery responsibility passes to the agent route:
/// the route must end every push in `did_deliver` or `did_decline`.
pub trait NodeBinding: TierBinding {
    fn node_uri(&self) -> &Uri;

    /// Attaches the parent context. One-shot.
    fn bind(&self, context: Arc<dyn NodeContext>) -> Result<(), RouterErr>;
    fn context(&self) -> Result<Arc<dyn NodeContext>, RouterErr>;

    fn push_down(&self, push: Push);
    fn push_up(&self, push: Push);
    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn http_uplink(&self, http: Arc<dyn HttpBinding>);
}

pub struct NodeTable {
    node_uri: Uri,
    lifecycle: TierLifecycle,
    context: OnceCell<Arc<dyn NodeContext>>,
    agent: Arc<dyn AgentRoute>,
}

impl NodeTable {
    pub fn new(node_uri: Uri, agent: Arc<dyn AgentRoute>) -> Arc<NodeTable> {
        Arc::new(NodeTable {
            node_uri,
            lifecycle: TierLifecycle::new(),
            context: OnceCell::new(),
            agent,
        })
    }

    fn up(&self) -> Result<Arc<dyn NodeContext>, RouterErr> {
        NodeBinding::context(self)
    }

    pub fn agent(&self) -> &Arc<dyn AgentRoute> {
        &self.agent
    }
}

forward_scheduling!(NodeTable);
forward_data!(NodeTable);
forward_admission!(NodeTable);
forward_provision!(NodeTable);

impl TierBinding for NodeTable {
    fn lifecycle(&self) -> &TierLifecycle {
        &self.lifecycle
    }

    fn close(&self) {
        if self.phase() >= TierPhase::Closed {
            return;
        }
        if let Err(err) = self.will_close() {
            self.did_fail(TierPhase::Closed, err);
        }
        if !self.lifecycle.advance(TierPhase::Closed) {
            return;
        }
        match self.context.get() {
            Some(context) => context.close(),
            None => {
                if let Err(err) = self.did_close() {
                    self.did_fail(TierPhase::Closed, err);
                }
            }
        }
    }
}

impl NodeBinding for NodeTable {
    fn node_uri(&self) -> &Uri {
        &self.node_uri
    }

    fn bind(&self, context: Arc<dyn NodeContext>) -> Result<(), RouterErr> {
        self.context
            .set(context)
            .map_err(|_| RouterErr::ContextBound)
    }

    fn context(&self) -> Result<Arc<dyn NodeContext>, RouterErr> {
        self.context.get().cloned().ok_or(RouterErr::Detached)
    }

    fn push_down(&self, push: Push) {
        self.agent.push(push);
    }

    fn push_up(&self, push: Push) {
        match NodeBinding::context(self) {
            Ok(context) => context.push_up(push),
            Err(err) => {
                tracing::warn!(node = %self.node_uri, error = %err, "push declined going up");
                push.did_decline();
            }
        }
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        self.agent.open_uplink(link);
    }

    fn http_uplink(&self, http: Arc<dyn HttpBinding>) {
        self.agent.http_uplink(http);
    }
}
