//! The host table: one host of a partition, routing to its nodes. A host
//! may carry a local admission policy that overrides the plane's.

use std::sync::{Arc, RwLock, Weak};

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::tier::{TierBinding, TierLifecycle, TierPhase};
use crate::uri::Uri;

use super::capability::{
    ErrorUplinkModem, HttpBinding, HttpErrorUplinkModem, LinkBinding, PlanePolicy, Push,
};
use super::node::{NodeBinding, NodeContext};
use super::{
    create_or_join, forward_admission, forward_data, forward_provision, forward_scheduling,
    Admission, Provision, RouterErr, TierContext,
};

/// What a host binding sees of its parent.
pub trait HostContext: TierContext {
    fn host_uri(&self) -> &Uri;
}

/// A bound host tier.
pub trait HostBinding: TierBinding {
    fn host_uri(&self) -> &Uri;

    /// Attaches the parent context. One-shot.
    fn bind(&self, context: Arc<dyn HostContext>) -> Result<(), RouterErr>;
    fn context(&self) -> Result<Arc<dyn HostContext>, RouterErr>;

    fn push_down(&self, push: Push);
    fn push_up(&self, push: Push);
    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn http_uplink(&self, http: Arc<dyn HttpBinding>);
}

pub struct HostTable {
    selfref: Weak<HostTable>,
    host_uri: Uri,
    lifecycle: TierLifecycle,
    context: OnceCell<Arc<dyn HostContext>>,
    nodes: DashMap<Uri, Arc<dyn NodeBinding>>,
    policy: RwLock<Option<Arc<dyn PlanePolicy>>>,
}

impl HostTable {
    pub fn new(host_uri: Uri) -> Arc<HostTable> {
        Arc::new_cyclic(|selfref| HostTable {
            selfref: selfref.clone(),
            host_uri,
            lifecycle: TierLifecycle::new(),
            context: OnceCell::new(),
            nodes: DashMap::new(),
            policy: RwLock::new(None),
        })
    }

    fn up(&self) -> Result<Arc<dyn HostContext>, RouterErr> {
        HostBinding::context(self)
    }

    /// Overrides the plane policy for this host and everything below it.
    pub fn set_policy(&self, policy: Arc<dyn PlanePolicy>) {
        if let Ok(mut guard) = self.policy.write() {
            *guard = Some(policy);
        }
    }

    pub fn get_node(&self, uri: &Uri) -> Option<Arc<dyn NodeBinding>> {
        self.nodes.get(uri).map(|entry| entry.value().clone())
    }

    pub fn get_nodes(&self) -> Vec<Arc<dyn NodeBinding>> {
        self.nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn open_node(&self, uri: &Uri) -> Result<Arc<dyn NodeBinding>, RouterErr> {
        let (binding, admitted) =
            create_or_join(&self.nodes, uri.clone(), || self.build_node(uri, None))?;
        if admitted {
            tracing::debug!(host = %self.host_uri, node = %uri, "node admitted");
        }
        Ok(binding)
    }

    /// Binds a caller-supplied node. Returns `None` without building
    /// anything when the key is already bound.
    pub fn open_node_with(
        &self,
        uri: &Uri,
        node: Arc<dyn NodeBinding>,
    ) -> Result<Option<Arc<dyn NodeBinding>>, RouterErr> {
        if self.nodes.contains_key(uri) {
            return Ok(None);
        }
        let (binding, admitted) =
            create_or_join(&self.nodes, uri.clone(), || self.build_node(uri, Some(node)))?;
        if !admitted {
            return Ok(None);
        }
        tracing::debug!(host = %self.host_uri, node = %uri, "node admitted");
        Ok(Some(binding))
    }

    pub fn close_node(&self, uri: &Uri) {
        if let Some(node) = self.get_node(uri) {
            node.close();
        }
    }

    fn build_node(
        &self,
        uri: &Uri,
        supplied: Option<Arc<dyn NodeBinding>>,
    ) -> Result<Arc<dyn NodeBinding>, RouterErr> {
        let binding = match supplied {
            Some(binding) => binding,
            None => Provision::create_node(self, uri)?,
        };
        let node_ctx = HostTableNode {
            host: self.selfref.clone(),
            node: Arc::downgrade(&binding),
            node_uri: uri.clone(),
        };
        binding.bind(Arc::new(node_ctx))?;
        Ok(binding)
    }

    pub(crate) fn close_node_binding(&self, uri: &Uri, node: &Arc<dyn NodeBinding>) {
        let removed = self
            .nodes
            .remove_if(uri, |_, bound| Arc::ptr_eq(bound, node))
            .is_some();
        if removed {
            tracing::debug!(host = %self.host_uri, node = %uri, "node closed");
        }
        if let Err(err) = node.did_close() {
            node.did_fail(TierPhase::Closed, err);
        }
    }
}

forward_scheduling!(HostTable);
forward_data!(HostTable);
forward_provision!(HostTable);

// the one policy override point in the tree
impl Admission for HostTable {
    fn policy(&self) -> Result<Arc<dyn PlanePolicy>, RouterErr> {
        if let Ok(guard) = self.policy.read() {
            if let Some(policy) = guard.as_ref() {
                return Ok(policy.clone());
            }
        }
        self.up()?.policy()
    }
}

impl TierBinding for HostTable {
    fn lifecycle(&self) -> &TierLifecycle {
        &self.lifecycle
    }

    fn apply(&self, phase: TierPhase) {
        if self.phase() >= phase {
            return;
        }
        if let Err(err) = self.will_phase(phase) {
            self.did_fail(phase, err);
        }
        if !self.lifecycle.advance(phase) {
            return;
        }
        for node in self.get_nodes() {
            node.apply(phase);
        }
        if let Err(err) = self.did_phase(phase) {
            self.did_fail(phase, err);
        }
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
        for node in self.get_nodes() {
            node.close();
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

impl HostBinding for HostTable {
    fn host_uri(&self) -> &Uri {
        &self.host_uri
    }

    fn bind(&self, context: Arc<dyn HostContext>) -> Result<(), RouterErr> {
        self.context
            .set(context)
            .map_err(|_| RouterErr::ContextBound)
    }

    fn context(&self) -> Result<Arc<dyn HostContext>, RouterErr> {
        self.context.get().cloned().ok_or(RouterErr::Detached)
    }

    fn push_down(&self, push: Push) {
        match self.open_node(push.node_uri()) {
            Ok(node) => node.push_down(push),
            Err(err) => {
                tracing::warn!(host = %self.host_uri, node = %push.node_uri(), error = %err, "push declined");
                push.did_decline();
            }
        }
    }

    fn push_up(&self, push: Push) {
        match HostBinding::context(self) {
            Ok(context) => context.push_up(push),
            Err(err) => {
                tracing::warn!(host = %self.host_uri, error = %err, "push declined going up");
                push.did_decline();
            }
        }
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        match self.open_node(link.node_uri()) {
            Ok(node) => node.open_uplink(link),
            Err(err) => {
                tracing::warn!(host = %self.host_uri, error = %err, "binding error stub for uplink");
                link.set_link_context(Arc::new(ErrorUplinkModem::no_node(link.node_uri())));
            }
        }
    }

    fn http_uplink(&self, http: Arc<dyn HttpBinding>) {
        match self.open_node(http.node_uri()) {
            Ok(node) => node.http_uplink(http),
            Err(err) => {
                tracing::warn!(host = %self.host_uri, error = %err, "binding error stub for http uplink");
                http.set_http_context(Arc::new(HttpErrorUplinkModem::no_node(http.node_uri())));
            }
        }
    }
}

/// Context handed to each node.
pub(crate) struct HostTableNode {
    host: Weak<HostTable>,
    node: Weak<dyn NodeBinding>,
    node_uri: Uri,
}

impl HostTableNode {
    fn up(&self) -> Result<Arc<HostTable>, RouterErr> {
        self.host.upgrade().ok_or(RouterErr::Detached)
    }
}

forward_scheduling!(HostTableNode);
forward_data!(HostTableNode);
forward_admission!(HostTableNode);
forward_provision!(HostTableNode);

impl TierContext for HostTableNode {
    fn close(&self) {
        if let (Some(host), Some(node)) = (self.host.upgrade(), self.node.upgrade()) {
            host.close_node_binding(&self.node_uri, &node);
        }
    }

    fn push_up(&self, push: Push) {
        match self.host.upgrade() {
            Some(host) => host.push_up(push),
            None => {
                tracing::warn!(node = %push.node_uri(), "push declined, host detached");
                push.did_decline();
            }
        }
    }
}

impl NodeContext for HostTableNode {
    fn node_uri(&self) -> &Uri {
        &self.node_uri
    }
}
