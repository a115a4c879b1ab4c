//! The mesh table: partitions a mesh's nodes and routes by partition key.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::term::Term;
use crate::tier::{TierBinding, TierLifecycle, TierPhase};
use crate::uri::Uri;

use super::capability::{
    DownlinkBinding, ErrorUplinkModem, HttpBinding, HttpErrorUplinkModem, LinkBinding, Push,
};
use super::part::{PartBinding, PartContext};
use super::{
    create_or_join, forward_admission, forward_data, forward_provision, forward_scheduling,
    Provision, RouterErr, TierContext,
};

/// What a mesh binding sees of its parent.
pub trait MeshContext: TierContext {
    fn mesh_uri(&self) -> &Uri;
}

/// A bound mesh tier. Implementations route pushes and uplinks down to
/// parts and forward everything else up through their context.
pub trait MeshBinding: TierBinding {
    fn mesh_uri(&self) -> &Uri;

    /// Attaches the parent context. One-shot.
    fn bind(&self, context: Arc<dyn MeshContext>) -> Result<(), RouterErr>;
    fn context(&self) -> Result<Arc<dyn MeshContext>, RouterErr>;

    fn push_down(&self, push: Push);
    fn push_up(&self, push: Push);
    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn http_uplink(&self, http: Arc<dyn HttpBinding>);

    fn bind_downlink(&self, downlink: Arc<dyn DownlinkBinding>) {
        self.open_uplink(downlink.link());
    }
}

pub struct MeshTable {
    selfref: Weak<MeshTable>,
    mesh_uri: Uri,
    lifecycle: TierLifecycle,
    context: OnceCell<Arc<dyn MeshContext>>,
    parts: DashMap<Term, Arc<dyn PartBinding>>,
}

impl MeshTable {
    pub fn new(mesh_uri: Uri) -> Arc<MeshTable> {
        Arc::new_cyclic(|selfref| MeshTable {
            selfref: selfref.clone(),
            mesh_uri,
            lifecycle: TierLifecycle::new(),
            context: OnceCell::new(),
            parts: DashMap::new(),
        })
    }

    fn up(&self) -> Result<Arc<dyn MeshContext>, RouterErr> {
        MeshBinding::context(self)
    }

    pub fn get_part(&self, key: &Term) -> Option<Arc<dyn PartBinding>> {
        self.parts.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_parts(&self) -> Vec<Arc<dyn PartBinding>> {
        self.parts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn open_part(&self, key: &Term) -> Result<Arc<dyn PartBinding>, RouterErr> {
        let (binding, admitted) =
            create_or_join(&self.parts, key.clone(), || self.build_part(key, None))?;
        if admitted {
            tracing::debug!(mesh = %self.mesh_uri, key = %key, "part admitted");
        }
        Ok(binding)
    }

    /// Binds a caller-supplied part. Returns `None` without building
    /// anything when the key is already bound.
    pub fn open_part_with(
        &self,
        key: &Term,
        part: Arc<dyn PartBinding>,
    ) -> Result<Option<Arc<dyn PartBinding>>, RouterErr> {
        if self.parts.contains_key(key) {
            return Ok(None);
        }
        let (binding, admitted) =
            create_or_join(&self.parts, key.clone(), || self.build_part(key, Some(part)))?;
        if !admitted {
            return Ok(None);
        }
        tracing::debug!(mesh = %self.mesh_uri, key = %key, "part admitted");
        Ok(Some(binding))
    }

    pub fn close_part(&self, key: &Term) {
        if let Some(part) = self.get_part(key) {
            part.close();
        }
    }

    fn build_part(
        &self,
        key: &Term,
        supplied: Option<Arc<dyn PartBinding>>,
    ) -> Result<Arc<dyn PartBinding>, RouterErr> {
        let binding = match supplied {
            Some(binding) => binding,
            None => Provision::create_part(self, &self.mesh_uri, key)?,
        };
        let part_ctx = MeshTablePart {
            mesh: self.selfref.clone(),
            part: Arc::downgrade(&binding),
            key: key.clone(),
        };
        binding.bind(Arc::new(part_ctx))?;
        Ok(binding)
    }

    pub(crate) fn close_part_binding(&self, key: &Term, part: &Arc<dyn PartBinding>) {
        let removed = self
            .parts
            .remove_if(key, |_, bound| Arc::ptr_eq(bound, part))
            .is_some();
        if removed {
            tracing::debug!(mesh = %self.mesh_uri, key = %key, "part closed");
        }
        if let Err(err) = part.did_close() {
            part.did_fail(TierPhase::Closed, err);
        }
    }

    fn route_part(&self, node_uri: &Uri) -> Result<Arc<dyn PartBinding>, RouterErr> {
        let key = Provision::part_key_for(self, node_uri)?;
        self.open_part(&key).map_err(|_| RouterErr::NoPart(key))
    }
}

forward_scheduling!(MeshTable);
forward_data!(MeshTable);
forward_admission!(MeshTable);
forward_provision!(MeshTable);

impl TierBinding for MeshTable {
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
        for part in self.get_parts() {
            part.apply(phase);
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
        for part in self.get_parts() {
            part.close();
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

impl MeshBinding for MeshTable {
    fn mesh_uri(&self) -> &Uri {
        &self.mesh_uri
    }

    fn bind(&self, context: Arc<dyn MeshContext>) -> Result<(), RouterErr> {
        self.context
            .set(context)
            .map_err(|_| RouterErr::ContextBound)
    }

    fn context(&self) -> Result<Arc<dyn MeshContext>, RouterErr> {
        self.context.get().cloned().ok_or(RouterErr::Detached)
    }

    fn push_down(&self, push: Push) {
        match self.route_part(push.node_uri()) {
            Ok(part) => part.push_down(push),
            Err(err) => {
                tracing::warn!(mesh = %self.mesh_uri, node = %push.node_uri(), error = %err, "push declined");
                push.did_decline();
            }
        }
    }

    fn push_up(&self, push: Push) {
        match MeshBinding::context(self) {
            Ok(context) => context.push_up(push),
            Err(err) => {
                tracing::warn!(mesh = %self.mesh_uri, error = %err, "push declined going up");
                push.did_decline();
            }
        }
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        match self.route_part(link.node_uri()) {
            Ok(part) => part.open_uplink(link),
            Err(err) => {
                tracing::warn!(mesh = %self.mesh_uri, error = %err, "binding error stub for uplink");
                let key = match err {
                    RouterErr::NoPart(key) => key,
                    _ => Term::Extant,
                };
                link.set_link_context(Arc::new(ErrorUplinkModem::no_part(&key)));
            }
        }
    }

    fn http_uplink(&self, http: Arc<dyn HttpBinding>) {
        match self.route_part(http.node_uri()) {
            Ok(part) => part.http_uplink(http),
            Err(err) => {
                tracing::warn!(mesh = %self.mesh_uri, error = %err, "binding error stub for http uplink");
                let key = match err {
                    RouterErr::NoPart(key) => key,
                    _ => Term::Extant,
                };
                http.set_http_context(Arc::new(HttpErrorUplinkModem::no_part(&key)));
            }
        }
    }
}

/// Context handed to each part.
pub(crate) struct MeshTablePart {
    mesh: Weak<MeshTable>,
    part: Weak<dyn PartBinding>,
    key: Term,
}

impl MeshTablePart {
    fn up(&self) -> Result<Arc<MeshTable>, RouterErr> {
        self.mesh.upgrade().ok_or(RouterErr::Detached)
    }
}

forward_scheduling!(MeshTablePart);
forward_data!(MeshTablePart);
forward_admission!(MeshTablePart);
forward_provision!(MeshTablePart);

impl TierContext for MeshTablePart {
    fn close(&self) {
        if let (Some(mesh), Some(part)) = (self.mesh.upgrade(), self.part.upgrade()) {
            mesh.close_part_binding(&self.key, &part);
        }
    }

    fn push_up(&self, push: Push) {
        match self.mesh.upgrade() {
            Some(mesh) => mesh.push_up(push),
            None => {
                tracing::warn!(node = %push.node_uri(), "push declined, mesh detached");
                push.did_decline();
            }
        }
    }
}

impl PartContext for MeshTablePart {
    fn part_key(&self) -> &Term {
        &self.key
    }
}
