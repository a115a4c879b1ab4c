//! The root table: top of the addressing tree and turnaround point for
//! upward pushes.

use std::sync::{Arc, RwLock, Weak};

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::term::Term;
use crate::tier::{TierBinding, TierLifecycle, TierPhase};
use crate::uri::Uri;

use super::capability::{
    DownlinkBinding, ErrorUplinkModem, HttpBinding, HttpErrorUplinkModem, LinkBinding, Push,
};
use super::host::HostBinding;
use super::mesh::{MeshBinding, MeshContext, MeshTable};
use super::node::NodeBinding;
use super::part::{PartBinding, PartTable};
use super::{
    create_or_join, forward_admission, forward_data, forward_provision, forward_scheduling,
    Admission, DataHost, Provision, RouterErr, Scheduling, TierContext,
};

/// The externally supplied top of the context chain. Holds the real
/// capability instances and the binding factories; everything deeper
/// forwards here.
///
/// `create_mesh`, `create_part` and `create_host` default to the
/// table-backed bindings; `create_node` is the one factory an embedder must
/// supply, since nodes wrap application agents. The `inject_*` hooks may
/// wrap a freshly created binding before admission; the defaults are
/// identity.
pub trait RootContext: Scheduling + DataHost + Admission + Send + Sync {
    fn create_mesh(&self, uri: &Uri) -> Arc<dyn MeshBinding> {
        MeshTable::new(uri.clone())
    }

    fn inject_mesh(&self, mesh: Arc<dyn MeshBinding>) -> Arc<dyn MeshBinding> {
        mesh
    }

    fn create_part(&self, _mesh_uri: &Uri, key: &Term) -> Arc<dyn PartBinding> {
        PartTable::new(key.clone())
    }

    fn inject_part(&self, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding> {
        part
    }

    fn create_host(&self, uri: &Uri) -> Arc<dyn HostBinding> {
        super::host::HostTable::new(uri.clone())
    }

    fn inject_host(&self, host: Arc<dyn HostBinding>) -> Arc<dyn HostBinding> {
        host
    }

    fn create_node(&self, uri: &Uri) -> Arc<dyn NodeBinding>;

    fn inject_node(&self, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        node
    }

    /// Partition key for a node address. The default collapses every node
    /// into a single partition.
    fn part_key_for(&self, _node_uri: &Uri) -> Term {
        Term::Extant
    }
}

pub struct RootTable {
    selfref: Weak<RootTable>,
    lifecycle: TierLifecycle,
    context: OnceCell<Arc<dyn RootContext>>,
    meshes: DashMap<Uri, Arc<dyn MeshBinding>>,
    /// Default mesh for pushes and uplinks that name no mesh.
    network: RwLock<Option<Arc<dyn MeshBinding>>>,
}

impl RootTable {
    pub fn new() -> Arc<RootTable> {
        Arc::new_cyclic(|selfref| RootTable {
            selfref: selfref.clone(),
            lifecycle: TierLifecycle::new(),
            context: OnceCell::new(),
            meshes: DashMap::new(),
            network: RwLock::new(None),
        })
    }

    /// Injects the root context. One-shot.
    pub fn bind(&self, context: Arc<dyn RootContext>) -> Result<(), RouterErr> {
        self.context
            .set(context)
            .map_err(|_| RouterErr::ContextBound)
    }

    pub fn context(&self) -> Result<Arc<dyn RootContext>, RouterErr> {
        self.context.get().cloned().ok_or(RouterErr::Detached)
    }

    fn up(&self) -> Result<Arc<dyn RootContext>, RouterErr> {
        self.context()
    }

    pub fn get_mesh(&self, uri: &Uri) -> Option<Arc<dyn MeshBinding>> {
        self.meshes.get(uri).map(|entry| entry.value().clone())
    }

    /// Snapshot of the bound meshes.
    pub fn get_meshes(&self) -> Vec<Arc<dyn MeshBinding>> {
        self.meshes
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn network(&self) -> Option<Arc<dyn MeshBinding>> {
        match self.network.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    /// Points the default network at an already bound mesh.
    pub fn set_network(&self, uri: &Uri) -> Result<(), RouterErr> {
        let mesh = self
            .get_mesh(uri)
            .ok_or_else(|| RouterErr::NoMesh(uri.clone()))?;
        if let Ok(mut guard) = self.network.write() {
            *guard = Some(mesh);
        }
        Ok(())
    }

    pub fn open_mesh(&self, uri: &Uri) -> Result<Arc<dyn MeshBinding>, RouterErr> {
        let (binding, admitted) =
            create_or_join(&self.meshes, uri.clone(), || self.build_mesh(uri, None))?;
        if admitted {
            tracing::debug!(mesh = %uri, "mesh admitted");
            self.adopt_network(&binding);
        }
        Ok(binding)
    }

    /// Binds a caller-supplied mesh. Returns `None` without building
    /// anything when the key is already bound.
    pub fn open_mesh_with(
        &self,
        uri: &Uri,
        mesh: Arc<dyn MeshBinding>,
    ) -> Result<Option<Arc<dyn MeshBinding>>, RouterErr> {
        if self.meshes.contains_key(uri) {
            return Ok(None);
        }
        let (binding, admitted) =
            create_or_join(&self.meshes, uri.clone(), || self.build_mesh(uri, Some(mesh)))?;
        if !admitted {
            return Ok(None);
        }
        tracing::debug!(mesh = %uri, "mesh admitted");
        self.adopt_network(&binding);
        Ok(Some(binding))
    }

    pub fn close_mesh(&self, uri: &Uri) {
        if let Some(mesh) = self.get_mesh(uri) {
            mesh.close();
        }
    }

    fn build_mesh(
        &self,
        uri: &Uri,
        supplied: Option<Arc<dyn MeshBinding>>,
    ) -> Result<Arc<dyn MeshBinding>, RouterErr> {
        let ctx = self.context()?;
        let binding = match supplied {
            Some(binding) => binding,
            None => ctx.create_mesh(uri),
        };
        let binding = ctx.inject_mesh(binding);
        let mesh_ctx = RootTableMesh {
            root: self.selfref.clone(),
            mesh: Arc::downgrade(&binding),
            mesh_uri: uri.clone(),
        };
        binding.bind(Arc::new(mesh_ctx))?;
        Ok(binding)
    }

    fn adopt_network(&self, mesh: &Arc<dyn MeshBinding>) {
        if let Ok(mut guard) = self.network.write() {
            if guard.is_none() {
                *guard = Some(mesh.clone());
            }
        }
    }

    /// Removes `mesh` from the table if it is still the bound entry for
    /// `uri`, then completes its close cascade. Called from the mesh's own
    /// context during close; also the landing point for orphan candidates,
    /// which were never in the table.
    pub(crate) fn close_mesh_binding(&self, uri: &Uri, mesh: &Arc<dyn MeshBinding>) {
        let removed = self
            .meshes
            .remove_if(uri, |_, bound| Arc::ptr_eq(bound, mesh))
            .is_some();
        if removed {
            if let Ok(mut guard) = self.network.write() {
                let was_network = guard
                    .as_ref()
                    .map(|network| Arc::ptr_eq(network, mesh))
                    .unwrap_or(false);
                if was_network {
                    *guard = None;
                }
            }
            tracing::debug!(mesh = %uri, "mesh closed");
        }
        if let Err(err) = mesh.did_close() {
            mesh.did_fail(TierPhase::Closed, err);
        }
    }

    /// Routes a push toward its node, lazily creating the mesh tier. The
    /// root is also the turnaround point for upward pushes.
    pub fn push_down(&self, push: Push) {
        let mesh = if push.mesh_uri().is_empty() {
            self.network()
                .ok_or_else(|| RouterErr::NoMesh(push.mesh_uri().clone()))
        } else {
            self.open_mesh(push.mesh_uri())
        };
        match mesh {
            Ok(mesh) => mesh.push_down(push),
            Err(err) => {
                tracing::warn!(node = %push.node_uri(), error = %err, "push declined at root");
                push.did_decline();
            }
        }
    }

    pub fn push_up(&self, push: Push) {
        self.push_down(push);
    }

    /// Routes an uplink toward its lane. Never fails: an unresolvable mesh
    /// binds the error stub as the link's context.
    pub fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        match self.network() {
            Some(mesh) => mesh.open_uplink(link),
            None => {
                tracing::warn!(node = %link.node_uri(), "no mesh for uplink, binding error stub");
                link.set_link_context(Arc::new(ErrorUplinkModem::no_mesh(link.node_uri())));
            }
        }
    }

    pub fn http_uplink(&self, http: Arc<dyn HttpBinding>) {
        match self.network() {
            Some(mesh) => mesh.http_uplink(http),
            None => {
                tracing::warn!(node = %http.node_uri(), "no mesh for http uplink, binding error stub");
                http.set_http_context(Arc::new(HttpErrorUplinkModem::no_mesh(http.node_uri())));
            }
        }
    }

    pub fn bind_downlink(&self, downlink: Arc<dyn DownlinkBinding>) {
        self.open_uplink(downlink.link());
    }
}

forward_scheduling!(RootTable);
forward_data!(RootTable);
forward_admission!(RootTable);

impl Provision for RootTable {
    fn create_mesh(&self, uri: &Uri) -> Result<Arc<dyn MeshBinding>, RouterErr> {
        let ctx = self.context()?;
        Ok(ctx.inject_mesh(ctx.create_mesh(uri)))
    }

    fn create_part(&self, mesh_uri: &Uri, key: &Term) -> Result<Arc<dyn PartBinding>, RouterErr> {
        let ctx = self.context()?;
        Ok(ctx.inject_part(ctx.create_part(mesh_uri, key)))
    }

    fn create_host(&self, uri: &Uri) -> Result<Arc<dyn HostBinding>, RouterErr> {
        let ctx = self.context()?;
        Ok(ctx.inject_host(ctx.create_host(uri)))
    }

    fn create_node(&self, uri: &Uri) -> Result<Arc<dyn NodeBinding>, RouterErr> {
        let ctx = self.context()?;
        Ok(ctx.inject_node(ctx.create_node(uri)))
    }

    fn part_key_for(&self, node_uri: &Uri) -> Result<Term, RouterErr> {
        Ok(self.context()?.part_key_for(node_uri))
    }
}

impl TierBinding for RootTable {
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
        for mesh in self.get_meshes() {
            mesh.apply(phase);
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
        for mesh in self.get_meshes() {
            mesh.close();
        }
        if let Err(err) = self.did_close() {
            self.did_fail(TierPhase::Closed, err);
        }
    }
}

/// Context handed to each mesh: forwards capabilities to the root table and
/// performs the mesh's removal on close.
pub(crate) struct RootTableMesh {
    root: Weak<RootTable>,
    mesh: Weak<dyn MeshBinding>,
    mesh_uri: Uri,
}

impl RootTableMesh {
    fn up(&self) -> Result<Arc<RootTable>, RouterErr> {
        self.root.upgrade().ok_or(RouterErr::Detached)
    }
}

forward_scheduling!(RootTableMesh);
forward_data!(RootTableMesh);
forward_admission!(RootTableMesh);
forward_provision!(RootTableMesh);

impl TierContext for RootTableMesh {
    fn close(&self) {
        if let (Some(root), Some(mesh)) = (self.root.upgrade(), self.mesh.upgrade()) {
            root.close_mesh_binding(&self.mesh_uri, &mesh);
        }
    }

    fn push_up(&self, push: Push) {
        match self.root.upgrade() {
            Some(root) => root.push_up(push),
            None => {
                tracing::warn!(node = %push.node_uri(), "push declined, root detached");
                push.did_decline();
            }
        }
    }
}

impl MeshContext for RootTableMesh {
    fn mesh_uri(&self) -> &Uri {
        &self.mesh_uri
    }
}
