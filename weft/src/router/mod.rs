//! The addressing tree: root, mesh, part, host and node tables, joined by a
//! context chain that forwards capabilities upward and routes pushes in both
//! directions.
//!
//! Resolution absence is never an error value here. A push that cannot
//! resolve is declined; an uplink that cannot resolve is bound to an error
//! stub. [`RouterErr`] covers the faults that are errors: a detached context
//! chain, a double context bind, and lifecycle hook failures.

pub mod capability;
pub mod host;
pub mod mesh;
pub mod node;
pub mod part;
pub mod root;

use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::term::Term;
use crate::tier::{activate, TierBinding, TierPhase};
use crate::uri::Uri;

use capability::{DataFactory, PlanePolicy, PolicyDirective, Push, Schedule, Stage, Store};
use host::HostBinding;
use mesh::MeshBinding;
use node::NodeBinding;
use part::PartBinding;
use root::{RootContext, RootTable};

#[derive(Debug, Clone, Error)]
pub enum RouterErr {
    #[error("no mesh bound at '{0}'")]
    NoMesh(Uri),
    #[error("no part bound for key '{0}'")]
    NoPart(Term),
    #[error("no host bound at '{0}'")]
    NoHost(Uri),
    #[error("no node bound at '{0}'")]
    NoNode(Uri),
    #[error("context chain detached")]
    Detached,
    #[error("context already bound")]
    ContextBound,
    #[error("lifecycle fault in phase {phase}: {message}")]
    Lifecycle { phase: TierPhase, message: String },
}

/// Access to the scheduling capabilities of the plane.
pub trait Scheduling {
    fn schedule(&self) -> Result<Arc<dyn Schedule>, RouterErr>;
    fn stage(&self) -> Result<Arc<dyn Stage>, RouterErr>;
}

/// Access to the data capabilities of the plane.
pub trait DataHost {
    fn data(&self) -> Result<Arc<dyn DataFactory>, RouterErr>;
    fn store(&self) -> Result<Arc<dyn Store>, RouterErr>;
}

/// Access to the admission policy of the plane.
pub trait Admission {
    fn policy(&self) -> Result<Arc<dyn PlanePolicy>, RouterErr>;

    fn authenticate(&self, credentials: Term) -> Result<PolicyDirective, RouterErr> {
        Ok(self.policy()?.authenticate(credentials))
    }
}

/// Access to the binding factories of the plane. Every tier forwards these
/// up the context chain; the root answers them from the external
/// [`RootContext`].
pub trait Provision {
    fn create_mesh(&self, uri: &Uri) -> Result<Arc<dyn MeshBinding>, RouterErr>;
    fn create_part(&self, mesh_uri: &Uri, key: &Term) -> Result<Arc<dyn PartBinding>, RouterErr>;
    fn create_host(&self, uri: &Uri) -> Result<Arc<dyn HostBinding>, RouterErr>;
    fn create_node(&self, uri: &Uri) -> Result<Arc<dyn NodeBinding>, RouterErr>;

    /// Partition key for a node address.
    fn part_key_for(&self, node_uri: &Uri) -> Result<Term, RouterErr>;
}

/// What every binding sees of its parent: the forwarded capabilities, the
/// upward push route, and its own removal.
pub trait TierContext: Scheduling + DataHost + Admission + Provision + Send + Sync {
    /// Removes the owning binding from its parent's table and completes the
    /// binding's close cascade.
    fn close(&self);

    fn push_up(&self, push: Push);
}

/// Forwards [`Scheduling`] through the type's `up()` accessor.
macro_rules! forward_scheduling {
    ($ty:ty) => {
        impl $crate::router::Scheduling for $ty {
            fn schedule(
                &self,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::capability::Schedule>,
                $crate::router::RouterErr,
            > {
                self.up()?.schedule()
            }

            fn stage(
                &self,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::capability::Stage>,
                $crate::router::RouterErr,
            > {
                self.up()?.stage()
            }
        }
    };
}

/// Forwards [`DataHost`] through the type's `up()` accessor.
macro_rules! forward_data {
    ($ty:ty) => {
        impl $crate::router::DataHost for $ty {
            fn data(
                &self,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::capability::DataFactory>,
                $crate::router::RouterErr,
            > {
                self.up()?.data()
            }

            fn store(
                &self,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::capability::Store>,
                $crate::router::RouterErr,
            > {
                self.up()?.store()
            }
        }
    };
}

/// Forwards [`Admission`] through the type's `up()` accessor.
macro_rules! forward_admission {
    ($ty:ty) => {
        impl $crate::router::Admission for $ty {
            fn policy(
                &self,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::capability::PlanePolicy>,
                $crate::router::RouterErr,
            > {
                self.up()?.policy()
            }
        }
    };
}

/// Forwards [`Provision`] through the type's `up()` accessor.
macro_rules! forward_provision {
    ($ty:ty) => {
        impl $crate::router::Provision for $ty {
            fn create_mesh(
                &self,
                uri: &$crate::uri::Uri,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::mesh::MeshBinding>,
                $crate::router::RouterErr,
            > {
                self.up()?.create_mesh(uri)
            }

            fn create_part(
                &self,
                mesh_uri: &$crate::uri::Uri,
                key: &$crate::term::Term,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::part::PartBinding>,
                $crate::router::RouterErr,
            > {
                self.up()?.create_part(mesh_uri, key)
            }

            fn create_host(
                &self,
                uri: &$crate::uri::Uri,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::host::HostBinding>,
                $crate::router::RouterErr,
            > {
                self.up()?.create_host(uri)
            }

            fn create_node(
                &self,
                uri: &$crate::uri::Uri,
            ) -> Result<
                ::std::sync::Arc<dyn $crate::router::node::NodeBinding>,
                $crate::router::RouterErr,
            > {
                self.up()?.create_node(uri)
            }

            fn part_key_for(
                &self,
                node_uri: &$crate::uri::Uri,
            ) -> Result<$crate::term::Term, $crate::router::RouterErr> {
                self.up()?.part_key_for(node_uri)
            }
        }
    };
}

pub(crate) use {forward_admission, forward_data, forward_provision, forward_scheduling};

/// Create-or-join through a table's map. The wait-free read path adopts an
/// existing binding without touching `build`. Otherwise a candidate is
/// built (side-effect-free on shared state), raced through the map entry,
/// and either admitted or closed as an orphan. Activation happens after the
/// entry guard is released; a losing candidate is never activated.
///
/// Returns the binding plus whether this call admitted it.
pub(crate) fn create_or_join<K, B, F>(
    map: &DashMap<K, Arc<B>>,
    key: K,
    build: F,
) -> Result<(Arc<B>, bool), RouterErr>
where
    K: Eq + Hash + Clone,
    B: TierBinding + ?Sized,
    F: FnOnce() -> Result<Arc<B>, RouterErr>,
{
    if let Some(existing) = map.get(&key) {
        return Ok((existing.clone(), false));
    }
    let candidate = build()?;
    let mut admitted = false;
    let binding = match map.entry(key) {
        Entry::Occupied(entry) => entry.get().clone(),
        Entry::Vacant(entry) => {
            entry.insert(Arc::clone(&candidate));
            admitted = true;
            Arc::clone(&candidate)
        }
    };
    if admitted {
        activate(&*binding);
    } else {
        tracing::debug!("lost admission race, closing orphan candidate");
        candidate.close();
    }
    Ok((binding, admitted))
}

/// Builds the table-backed pieces of a routing tree. Embedders with several
/// routers pick the one with the highest priority.
pub trait Router: Send + Sync {
    fn router_priority(&self) -> f64 {
        0.0
    }

    fn create_root(&self, context: Arc<dyn RootContext>) -> Result<Arc<RootTable>, RouterErr>;
    fn create_mesh(&self, uri: &Uri) -> Arc<dyn MeshBinding>;
    fn create_host(&self, uri: &Uri) -> Arc<dyn HostBinding>;
}

/// The table-backed router.
pub struct TableRouter;

impl Router for TableRouter {
    fn create_root(&self, context: Arc<dyn RootContext>) -> Result<Arc<RootTable>, RouterErr> {
        let root = RootTable::new();
        root.bind(context)?;
        Ok(root)
    }

    fn create_mesh(&self, uri: &Uri) -> Arc<dyn MeshBinding> {
        mesh::MeshTable::new(uri.clone())
    }

    fn create_host(&self, uri: &Uri) -> Arc<dyn HostBinding> {
        host::HostTable::new(uri.clone())
    }
}
