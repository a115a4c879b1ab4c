//! Capability seams consumed by the routing tables.
//!
//! Everything the tree cannot do by itself lives behind a trait here:
//! scheduling, data storage, admission policy, and the push/uplink
//! contracts. The externally supplied root context holds the real
//! implementations; every deeper tier reaches them by forwarding.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::term::Term;
use crate::uri::Uri;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task after a delay.
pub trait Schedule: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task);
}

/// Runs a task asynchronously, now.
pub trait Stage: Send + Sync {
    fn execute(&self, task: Task);
}

/// [`Schedule`] and [`Stage`] backed by a tokio runtime handle.
pub struct TokioStage {
    handle: tokio::runtime::Handle,
}

impl TokioStage {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        TokioStage { handle }
    }
}

impl Stage for TokioStage {
    fn execute(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }
}

impl Schedule for TokioStage {
    fn schedule(&self, delay: Duration, task: Task) {
        let handle = self.handle.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            handle.spawn_blocking(task);
        });
    }
}

/// Opaque handle to an ordered list store.
pub trait ListData: Send + Sync {
    fn name(&self) -> &str;
}

/// Opaque handle to a keyed map store.
pub trait MapData: Send + Sync {
    fn name(&self) -> &str;
}

/// Opaque handle to a spatially indexed store.
pub trait SpatialData: Send + Sync {
    fn name(&self) -> &str;
}

/// Opaque handle to a single-value store.
pub trait ValueData: Send + Sync {
    fn name(&self) -> &str;
}

/// Opaque handle to the top-level store a data factory draws from.
pub trait Store: Send + Sync {
    fn name(&self) -> &str;
}

/// Opens (create-or-get) and injects (register-existing) data handles.
pub trait DataFactory: Send + Sync {
    fn open_list_data(&self, name: &str) -> Arc<dyn ListData>;
    fn open_map_data(&self, name: &str) -> Arc<dyn MapData>;
    fn open_spatial_data(&self, name: &str) -> Arc<dyn SpatialData>;
    fn open_value_data(&self, name: &str) -> Arc<dyn ValueData>;

    fn inject_list_data(&self, data: Arc<dyn ListData>);
    fn inject_map_data(&self, data: Arc<dyn MapData>);
    fn inject_spatial_data(&self, data: Arc<dyn SpatialData>);
    fn inject_value_data(&self, data: Arc<dyn ValueData>);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
}

/// Admission verdict for a set of credentials. `Deny` rejects this attempt;
/// `Forbid` rejects the principal outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PolicyDirective {
    Allow(Identity),
    Deny,
    Forbid,
}

pub trait PlanePolicy: Send + Sync {
    fn authenticate(&self, credentials: Term) -> PolicyDirective;
}

/// A routed message. Consumed exactly once: every push ends in exactly one
/// of [`did_deliver`](PushRequest::did_deliver) or
/// [`did_decline`](PushRequest::did_decline).
pub trait PushRequest: Send {
    /// Target mesh; an empty uri routes to the default network mesh.
    fn mesh_uri(&self) -> &Uri;
    fn node_uri(&self) -> &Uri;
    fn lane_uri(&self) -> &Uri;
    fn body(&self) -> &Term;

    fn host_uri(&self) -> Uri {
        self.node_uri().to_host()
    }

    fn did_deliver(self: Box<Self>);
    fn did_decline(self: Box<Self>);
}

pub type Push = Box<dyn PushRequest>;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkStatus {
    Linked,
    Unlinked(Term),
}

/// Terminal state a bound uplink reports through.
pub trait LinkContext: Send + Sync {
    fn link_status(&self) -> LinkStatus;
}

/// An uplink in want of a context. Routing always binds one: the resolved
/// lane on success, an error stub on a miss.
pub trait LinkBinding: Send + Sync {
    fn node_uri(&self) -> &Uri;
    fn lane_uri(&self) -> &Uri;
    fn set_link_context(&self, context: Arc<dyn LinkContext>);
    fn link_context(&self) -> Option<Arc<dyn LinkContext>>;
}

pub trait HttpContext: Send + Sync {
    fn status_code(&self) -> u16;
    fn reason(&self) -> Term;
}

/// HTTP analogue of [`LinkBinding`].
pub trait HttpBinding: Send + Sync {
    fn node_uri(&self) -> &Uri;
    fn lane_uri(&self) -> &Uri;
    fn set_http_context(&self, context: Arc<dyn HttpContext>);
}

/// A downlink wraps the uplink it wants opened; binding one is push routing
/// in disguise.
pub trait DownlinkBinding: Send + Sync {
    fn link(&self) -> Arc<dyn LinkBinding>;
}

/// The node-level seam lanes live behind. The route owns delivery: a pushed
/// message must end in `did_deliver` or `did_decline`.
pub trait AgentRoute: Send + Sync {
    fn push(&self, push: Push);
    fn open_uplink(&self, link: Arc<dyn LinkBinding>);
    fn http_uplink(&self, http: Arc<dyn HttpBinding>);
}

/// Link context bound in place of a lane when an address does not resolve.
/// Reports `Unlinked` with a reason record naming the unresolved tier.
pub struct ErrorUplinkModem {
    reason: Term,
}

impl ErrorUplinkModem {
    pub fn no_mesh(uri: &Uri) -> Self {
        ErrorUplinkModem {
            reason: Term::slot("noMesh", Term::text(uri.to_string())),
        }
    }

    pub fn no_part(key: &Term) -> Self {
        ErrorUplinkModem {
            reason: Term::slot("noPart", key.clone()),
        }
    }

    pub fn no_host(uri: &Uri) -> Self {
        ErrorUplinkModem {
            reason: Term::slot("noHost", Term::text(uri.to_string())),
        }
    }

    pub fn no_node(uri: &Uri) -> Self {
        ErrorUplinkModem {
            reason: Term::slot("noNode", Term::text(uri.to_string())),
        }
    }

    pub fn reason(&self) -> &Term {
        &self.reason
    }
}

impl LinkContext for ErrorUplinkModem {
    fn link_status(&self) -> LinkStatus {
        LinkStatus::Unlinked(self.reason.clone())
    }
}

/// HTTP analogue of [`ErrorUplinkModem`]: a 404 with the same reason record.
pub struct HttpErrorUplinkModem {
    reason: Term,
}

impl HttpErrorUplinkModem {
    pub fn no_mesh(uri: &Uri) -> Self {
        HttpErrorUplinkModem {
            reason: Term::slot("noMesh", Term::text(uri.to_string())),
        }
    }

    pub fn no_part(key: &Term) -> Self {
        HttpErrorUplinkModem {
            reason: Term::slot("noPart", key.clone()),
        }
    }

    pub fn no_host(uri: &Uri) -> Self {
        HttpErrorUplinkModem {
            reason: Term::slot("noHost", Term::text(uri.to_string())),
        }
    }

    pub fn no_node(uri: &Uri) -> Self {
        HttpErrorUplinkModem {
            reason: Term::slot("noNode", Term::text(uri.to_string())),
        }
    }
}

impl HttpContext for HttpErrorUplinkModem {
    fn status_code(&self) -> u16 {
        404
    }

    fn reason(&self) -> Term {
        self.reason.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_modem_reports_unlinked_with_marker() {
        let uri = Uri::parse("warp://nowhere").unwrap();
        let modem = ErrorUplinkModem::no_mesh(&uri);
        match modem.link_status() {
            LinkStatus::Unlinked(reason) => {
                assert_eq!(
                    reason.member("noMesh"),
                    Some(Term::text("warp://nowhere"))
                );
            }
            LinkStatus::Linked => panic!("stub must report unlinked"),
        }
    }

    #[tokio::test]
    async fn tokio_stage_runs_and_schedules() {
        let stage = TokioStage::new(tokio::runtime::Handle::current());

        let (tx, rx) = std::sync::mpsc::channel();
        stage.execute(Box::new(move || {
            tx.send("now").ok();
        }));
        let got = tokio::task::spawn_blocking(move || rx.recv().unwrap())
            .await
            .unwrap();
        assert_eq!(got, "now");

        let (tx, rx) = std::sync::mpsc::channel();
        stage.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                tx.send("later").ok();
            }),
        );
        let got = tokio::task::spawn_blocking(move || rx.recv().unwrap())
            .await
            .unwrap();
        assert_eq!(got, "later");
    }

    #[test]
    fn http_error_modem_is_not_found() {
        let modem = HttpErrorUplinkModem::no_node(&Uri::parse("/missing").unwrap());
        assert_eq!(modem.status_code(), 404);
        assert_eq!(
            modem.reason().member("noNode"),
            Some(Term::text("/missing"))
        );
    }
}
