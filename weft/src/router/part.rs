//! The part table: one partition of a mesh, routing to hosts by host uri.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::term::Term;
use crate::tier::{TierBinding, TierLifecycle, TierPhase};
use crate::uri::Uri;

use super::capability::{
    ErrorUplinkModem, HttpBinding, HttpErrorUplinkModem, LinkBinding, Push,
};
use super::host::{HostBinding, HostContext};
use super::{
    create_or_join, forward_admission, forward_data, forward_provision, forward_scheduling,
    Provision, RouterErr, TierContext,
};

/// What a part binding sees of its parent.
pub trait PartContext: TierContext {
    fn part_key(&self) -> &Term;
}

/// A bound partition tier.
pub trait PartBinding: TierBinding {
    fn part_key(&self) -> &Term;

    /// Attaches the parent context. One-shot.
    fn bind(&self, context: Arc<dyn PartContext>) -> Result<(), RouterErr>;
    fn context(&self) -> Result<Arc<dyn PartContext>, RouterErr>;

    fn push_down(&self, push: Push);
    fn push_up(&self, push: Push);
    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn http_uplink(&self, http: Arc<dyn HttpBinding>);
}

pub struct PartTable {
    selfref: Weak<PartTable>,
    key: Term,
    lifecycle: TierLifecycle,
    context: OnceCell<Arc<dyn PartContext>>,
    hosts: DashMap<Uri, Arc<dyn HostBinding>>,
}

impl PartTable {
    pub fn new(key: Term) -> Arc<PartTable> {
        Arc::new_cyclic(|selfref| PartTable {
            selfref: selfref.clone(),
            key,
            lifecycle: TierLifecycle::new(),
            context: OnceCell::new(),
            hosts: DashMap::new(),
        })
    }

    fn up(&self) -> Result<Arc<dyn PartContext>, RouterErr> {
        PartBinding::context(self)
    }

    pub fn get_host(&self, uri: &Uri) -> Option<Arc<dyn HostBinding>> {
        self.hosts.get(uri).map(|entry| entry.value().clone())
    }

    pub fn get_hosts(&self) -> Vec<Arc<dyn HostBinding>> {
        self.hosts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn open_host(&self, uri: &Uri) -> Result<Arc<dyn HostBinding>, RouterErr> {
        let (binding, admitted) =
            create_or_join(&self.hosts, uri.clone(), || self.build_host(uri, None))?;
        if admitted {
            tracing::debug!(part = %self.key, host = %uri, "host admitted");
        }
        Ok(binding)
    }

    /// Binds a caller-supplied host. Returns `None` without building
    /// anything when the key is already bound.
    pub fn open_host_with(
        &self,
        uri: &Uri,
        host: Arc<dyn HostBinding>,
    ) -> Result<Option<Arc<dyn HostBinding>>, RouterErr> {
        if self.hosts.contains_key(uri) {
            return Ok(None);
        }
        let (binding, admitted) =
            create_or_join(&self.hosts, uri.clone(), || self.build_host(uri, Some(host)))?;
        if !admitted {
            return Ok(None);
        }
        tracing::debug!(part = %self.key, host = %uri, "host admitted");
        Ok(Some(binding))
    }

    pub fn close_host(&self, uri: &Uri) {
        if let Some(host) = self.get_host(uri) {
            host.close();
        }
    }

    fn build_host(
        &self,
        uri: &Uri,
        supplied: Option<Arc<dyn HostBinding>>,
    ) -> Result<Arc<dyn HostBinding>, RouterErr> {
        let binding = match supplied {
            Some(binding) => binding,
            None => Provision::create_host(self, uri)?,
        };
        let host_ctx = PartTableHost {
            part: self.selfref.clone(),
            host: Arc::downgrade(&binding),
            host_uri: uri.clone(),
        };
        binding.bind(Arc::new(host_ctx))?;
        Ok(binding)
    }

    pub(crate) fn close_host_binding(&self, uri: &Uri, host: &Arc<dyn HostBinding>) {
        let removed = self
            .hosts
            .remove_if(uri, |_, bound| Arc::ptr_eq(bound, host))
            .is_some();
        if removed {
            tracing::debug!(part = %self.key, host = %uri, "host closed");
        }
        if let Err(err) = host.did_close() {
            host.did_fail(TierPhase::Closed, err);
        }
    }

    fn route_host(&self, node_uri: &Uri) -> Result<Arc<dyn HostBinding>, RouterErr> {
        let host_uri = node_uri.to_host();
        self.open_host(&host_uri)
            .map_err(|_| RouterErr::NoHost(host_uri))
    }
}

forward_scheduling!(PartTable);
forward_data!(PartTable);
forward_admission!(PartTable);
forward_provision!(PartTable);

impl TierBinding for PartTable {
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
        for host in self.get_hosts() {
            host.apply(phase);
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
        for host in self.get_hosts() {
            host.close();
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

impl PartBinding for PartTable {
    fn part_key(&self) -> &Term {
        &self.key
    }

    fn bind(&self, context: Arc<dyn PartContext>) -> Result<(), RouterErr> {
        self.context
            .set(context)
            .map_err(|_| RouterErr::ContextBound)
    }

    fn context(&self) -> Result<Arc<dyn PartContext>, RouterErr> {
        self.context.get().cloned().ok_or(RouterErr::Detached)
    }

    fn push_down(&self, push: Push) {
        match self.route_host(push.node_uri()) {
            Ok(host) => host.push_down(push),
            Err(err) => {
                tracing::warn!(part = %self.key, node = %push.node_uri(), error = %err, "push declined");
                push.did_decline();
            }
        }
    }

    fn push_up(&self, push: Push) {
        match PartBinding::context(self) {
            Ok(context) => context.push_up(push),
            Err(err) => {
                tracing::warn!(part = %self.key, error = %err, "push declined going up");
                push.did_decline();
            }
        }
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        match self.route_host(link.node_uri()) {
            Ok(host) => host.open_uplink(link),
            Err(err) => {
                tracing::warn!(part = %self.key, error = %err, "binding error stub for uplink");
                link.set_link_context(Arc::new(ErrorUplinkModem::no_host(
                    &link.node_uri().to_host(),
                )));
            }
        }
    }

    fn http_uplink(&self, http: Arc<dyn HttpBinding>) {
        match self.route_host(http.node_uri()) {
            Ok(host) => host.http_uplink(http),
            Err(err) => {
                tracing::warn!(part = %self.key, error = %err, "binding error stub for http uplink");
                http.set_http_context(Arc::new(HttpErrorUplinkModem::no_host(
                    &http.node_uri().to_host(),
                )));
            }
        }
    }
}

/// Context handed to each host.
pub(crate) struct PartTableHost {
    part: Weak<PartTable>,
    host: Weak<dyn HostBinding>,
    host_uri: Uri,
}

impl PartTableHost {
    fn up(&self) -> Result<Arc<PartTable>, RouterErr> {
        self.part.upgrade().ok_or(RouterErr::Detached)
    }
}

forward_scheduling!(PartTableHost);
forward_data!(PartTableHost);
forward_admission!(PartTableHost);
forward_provision!(PartTableHost);

impl TierContext for PartTableHost {
    fn close(&self) {
        if let (Some(part), Some(host)) = (self.part.upgrade(), self.host.upgrade()) {
            part.close_host_binding(&self.host_uri, &host);
        }
    }

    fn push_up(&self, push: Push) {
        match self.part.upgrade() {
            Some(part) => part.push_up(push),
            None => {
                tracing::warn!(node = %push.node_uri(), "push declined, part detached");
                push.did_decline();
            }
        }
    }
}

impl HostContext for PartTableHost {
    fn host_uri(&self) -> &Uri {
        &self.host_uri
    }
}
