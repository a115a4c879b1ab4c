//! Cross-thread admission and routing behavior of the addressing tree.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use weft::router::capability::{
    AgentRoute, DataFactory, HttpBinding, HttpContext, Identity, LinkBinding, LinkContext,
    LinkStatus, ListData, MapData, PlanePolicy, PolicyDirective, Push, PushRequest, Schedule,
    SpatialData, Stage, Store, Task, ValueData,
};
use weft::router::mesh::{MeshBinding, MeshTable};
use weft::router::node::{NodeBinding, NodeTable};
use weft::router::part::PartBinding;
use weft::router::root::{RootContext, RootTable};
use weft::router::{Admission, RouterErr, Scheduling};
use weft::term::Term;
use weft::tier::{TierBinding, TierPhase};
use weft::uri::Uri;

fn trace_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn uri(text: &str) -> Uri {
    Uri::parse(text).unwrap()
}

struct InlineStage;

impl Stage for InlineStage {
    fn execute(&self, task: Task) {
        task();
    }
}

impl Schedule for InlineStage {
    fn schedule(&self, _delay: std::time::Duration, task: Task) {
        task();
    }
}

struct NullData(String);

impl ListData for NullData {
    fn name(&self) -> &str {
        &self.0
    }
}

impl MapData for NullData {
    fn name(&self) -> &str {
        &self.0
    }
}

impl SpatialData for NullData {
    fn name(&self) -> &str {
        &self.0
    }
}

impl ValueData for NullData {
    fn name(&self) -> &str {
        &self.0
    }
}

struct TestDataFactory;

impl DataFactory for TestDataFactory {
    fn open_list_data(&self, name: &str) -> Arc<dyn ListData> {
        Arc::new(NullData(name.to_string()))
    }

    fn open_map_data(&self, name: &str) -> Arc<dyn MapData> {
        Arc::new(NullData(name.to_string()))
    }

    fn open_spatial_data(&self, name: &str) -> Arc<dyn SpatialData> {
        Arc::new(NullData(name.to_string()))
    }

    fn open_value_data(&self, name: &str) -> Arc<dyn ValueData> {
        Arc::new(NullData(name.to_string()))
    }

    fn inject_list_data(&self, _data: Arc<dyn ListData>) {}
    fn inject_map_data(&self, _data: Arc<dyn MapData>) {}
    fn inject_spatial_data(&self, _data: Arc<dyn SpatialData>) {}
    fn inject_value_data(&self, _data: Arc<dyn ValueData>) {}
}

struct TestStore;

impl Store for TestStore {
    fn name(&self) -> &str {
        "test"
    }
}

struct AllowAll;

impl PlanePolicy for AllowAll {
    fn authenticate(&self, _credentials: Term) -> PolicyDirective {
        PolicyDirective::Allow(Identity {
            subject: "anon".to_string(),
        })
    }
}

struct LinkedContext;

impl LinkContext for LinkedContext {
    fn link_status(&self) -> LinkStatus {
        LinkStatus::Linked
    }
}

struct OkContext;

impl HttpContext for OkContext {
    fn status_code(&self) -> u16 {
        200
    }

    fn reason(&self) -> Term {
        Term::Extant
    }
}

/// Agent that delivers every push and links every uplink.
struct NullAgent;

impl AgentRoute for NullAgent {
    fn push(&self, push: Push) {
        push.did_deliver();
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        link.set_link_context(Arc::new(LinkedContext));
    }

    fn http_uplink(&self, http: Arc<dyn HttpBinding>) {
        http.set_http_context(Arc::new(OkContext));
    }
}

struct TestRootContext {
    created_meshes: AtomicUsize,
    created_nodes: AtomicUsize,
    bindings: Mutex<Vec<Arc<dyn MeshBinding>>>,
    part_by_first_segment: bool,
}

impl TestRootContext {
    fn new() -> Self {
        TestRootContext {
            created_meshes: AtomicUsize::new(0),
            created_nodes: AtomicUsize::new(0),
            bindings: Mutex::new(Vec::new()),
            part_by_first_segment: false,
        }
    }

    fn partitioned() -> Self {
        TestRootContext {
            part_by_first_segment: true,
            ..TestRootContext::new()
        }
    }
}

impl Scheduling for TestRootContext {
    fn schedule(&self) -> Result<Arc<dyn Schedule>, RouterErr> {
        Ok(Arc::new(InlineStage))
    }

    fn stage(&self) -> Result<Arc<dyn Stage>, RouterErr> {
        Ok(Arc::new(InlineStage))
    }
}

impl weft::router::DataHost for TestRootContext {
    fn data(&self) -> Result<Arc<dyn DataFactory>, RouterErr> {
        Ok(Arc::new(TestDataFactory))
    }

    fn store(&self) -> Result<Arc<dyn Store>, RouterErr> {
        Ok(Arc::new(TestStore))
    }
}

impl Admission for TestRootContext {
    fn policy(&self) -> Result<Arc<dyn PlanePolicy>, RouterErr> {
        Ok(Arc::new(AllowAll))
    }
}

impl RootContext for TestRootContext {
    fn create_mesh(&self, uri: &Uri) -> Arc<dyn MeshBinding> {
        self.created_meshes.fetch_add(1, Ordering::SeqCst);
        let mesh: Arc<dyn MeshBinding> = MeshTable::new(uri.clone());
        self.bindings.lock().unwrap().push(mesh.clone());
        mesh
    }

    fn create_node(&self, uri: &Uri) -> Arc<dyn NodeBinding> {
        self.created_nodes.fetch_add(1, Ordering::SeqCst);
        NodeTable::new(uri.clone(), Arc::new(NullAgent))
    }

    fn part_key_for(&self, node_uri: &Uri) -> Term {
        if self.part_by_first_segment {
            match node_uri.segments().next() {
                Some(segment) => Term::text(segment),
                None => Term::Extant,
            }
        } else {
            Term::Extant
        }
    }
}

fn bound_root(context: Arc<TestRootContext>) -> Arc<RootTable> {
    let root = RootTable::new();
    root.bind(context).unwrap();
    root
}

struct TestPush {
    mesh: Uri,
    node: Uri,
    lane: Uri,
    body: Term,
    delivered: Arc<AtomicUsize>,
    declined: Arc<AtomicUsize>,
}

impl TestPush {
    fn boxed(
        mesh: &Uri,
        node: &Uri,
        delivered: &Arc<AtomicUsize>,
        declined: &Arc<AtomicUsize>,
    ) -> Push {
        Box::new(TestPush {
            mesh: mesh.clone(),
            node: node.clone(),
            lane: uri("/lane"),
            body: Term::text("payload"),
            delivered: delivered.clone(),
            declined: declined.clone(),
        })
    }
}

impl PushRequest for TestPush {
    fn mesh_uri(&self) -> &Uri {
        &self.mesh
    }

    fn node_uri(&self) -> &Uri {
        &self.node
    }

    fn lane_uri(&self) -> &Uri {
        &self.lane
    }

    fn body(&self) -> &Term {
        &self.body
    }

    fn did_deliver(self: Box<Self>) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }

    fn did_decline(self: Box<Self>) {
        self.declined.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestLink {
    node: Uri,
    lane: Uri,
    context: Mutex<Option<Arc<dyn LinkContext>>>,
}

impl TestLink {
    fn new(node: &Uri) -> Arc<TestLink> {
        Arc::new(TestLink {
            node: node.clone(),
            lane: uri("/lane"),
            context: Mutex::new(None),
        })
    }
}

impl LinkBinding for TestLink {
    fn node_uri(&self) -> &Uri {
        &self.node
    }

    fn lane_uri(&self) -> &Uri {
        &self.lane
    }

    fn set_link_context(&self, context: Arc<dyn LinkContext>) {
        *self.context.lock().unwrap() = Some(context);
    }

    fn link_context(&self) -> Option<Arc<dyn LinkContext>> {
        self.context.lock().unwrap().clone()
    }
}

struct TestHttp {
    node: Uri,
    lane: Uri,
    context: Mutex<Option<Arc<dyn HttpContext>>>,
}

impl TestHttp {
    fn new(node: &Uri) -> Arc<TestHttp> {
        Arc::new(TestHttp {
            node: node.clone(),
            lane: uri("/lane"),
            context: Mutex::new(None),
        })
    }

    fn http_context(&self) -> Option<Arc<dyn HttpContext>> {
        self.context.lock().unwrap().clone()
    }
}

impl HttpBinding for TestHttp {
    fn node_uri(&self) -> &Uri {
        &self.node
    }

    fn lane_uri(&self) -> &Uri {
        &self.lane
    }

    fn set_http_context(&self, context: Arc<dyn HttpContext>) {
        *self.context.lock().unwrap() = Some(context);
    }
}

#[test]
fn racing_first_touch_admits_exactly_one_binding() {
    trace_init();
    let context = Arc::new(TestRootContext::new());
    let root = bound_root(context.clone());
    let mesh_uri = uri("warp://alpha");

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let root = root.clone();
            let mesh_uri = mesh_uri.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                root.open_mesh(&mesh_uri).unwrap()
            })
        })
        .collect();

    let adopted: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let bound = root.get_mesh(&mesh_uri).unwrap();
    for mesh in &adopted {
        assert!(Arc::ptr_eq(mesh, &bound), "every caller adopts the winner");
    }
    assert_eq!(root.get_meshes().len(), 1);

    // candidates may have been built concurrently, but exactly one was
    // activated; the rest were closed without ever starting
    let bindings = context.bindings.lock().unwrap();
    assert_eq!(bindings.len(), context.created_meshes.load(Ordering::SeqCst));
    let started = bindings
        .iter()
        .filter(|mesh| mesh.phase() == TierPhase::Started)
        .count();
    assert_eq!(started, 1);
    for mesh in bindings.iter() {
        assert!(matches!(
            mesh.phase(),
            TierPhase::Started | TierPhase::Closed
        ));
    }
}

#[test]
fn every_push_is_delivered_or_declined() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    let delivered = Arc::new(AtomicUsize::new(0));
    let declined = Arc::new(AtomicUsize::new(0));

    let mesh_uri = uri("warp://alpha");
    let node_uri = uri("warp://alpha/agent/1");

    // lazily creates mesh, part, host and node on the way down
    root.push_down(TestPush::boxed(&mesh_uri, &node_uri, &delivered, &declined));
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    // empty mesh uri routes through the default network mesh
    root.push_down(TestPush::boxed(&uri(""), &node_uri, &delivered, &declined));
    assert_eq!(delivered.load(Ordering::SeqCst), 2);

    // a root with no context cannot resolve, so it declines
    let unbound = RootTable::new();
    unbound.push_down(TestPush::boxed(&mesh_uri, &node_uri, &delivered, &declined));
    assert_eq!(declined.load(Ordering::SeqCst), 1);

    assert_eq!(
        delivered.load(Ordering::SeqCst) + declined.load(Ordering::SeqCst),
        3
    );
}

#[test]
fn upward_push_turns_around_at_root() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    let delivered = Arc::new(AtomicUsize::new(0));
    let declined = Arc::new(AtomicUsize::new(0));

    let mesh_uri = uri("warp://alpha");
    let node_uri = uri("warp://alpha/agent/1");
    let mesh = root.open_mesh(&mesh_uri).unwrap();

    mesh.push_up(TestPush::boxed(&mesh_uri, &node_uri, &delivered, &declined));
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert_eq!(declined.load(Ordering::SeqCst), 0);
}

#[test]
fn unresolvable_uplink_binds_error_stub() {
    trace_init();
    // no context, no meshes: the uplink still gets a terminal context
    let root = RootTable::new();
    let link = TestLink::new(&uri("warp://nowhere/agent/1"));
    root.open_uplink(link.clone());

    let context = link.link_context().expect("stub must be bound");
    match context.link_status() {
        LinkStatus::Unlinked(reason) => {
            assert!(reason.member("noMesh").is_some());
        }
        LinkStatus::Linked => panic!("expected the error stub"),
    }
}

#[test]
fn resolved_uplink_reaches_the_agent() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    root.open_mesh(&uri("warp://alpha")).unwrap();

    let link = TestLink::new(&uri("warp://alpha/agent/1"));
    root.open_uplink(link.clone());
    let context = link.link_context().expect("agent must bind a context");
    assert_eq!(context.link_status(), LinkStatus::Linked);
}

#[test]
fn unresolvable_http_uplink_binds_error_stub() {
    trace_init();
    // no context, no meshes: the http uplink still gets a terminal context
    let root = RootTable::new();
    let http = TestHttp::new(&uri("warp://nowhere/agent/1"));
    root.http_uplink(http.clone());

    let context = http.http_context().expect("stub must be bound");
    assert_eq!(context.status_code(), 404);
    assert!(context.reason().member("noMesh").is_some());
}

#[test]
fn resolved_http_uplink_reaches_the_agent() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    root.open_mesh(&uri("warp://alpha")).unwrap();

    let http = TestHttp::new(&uri("warp://alpha/agent/1"));
    root.http_uplink(http.clone());
    let context = http.http_context().expect("agent must bind a context");
    assert_eq!(context.status_code(), 200);
}

#[test]
fn root_lifecycle_cascades_to_children() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    let mesh_uri = uri("warp://alpha");
    let table = MeshTable::new(mesh_uri.clone());
    root.open_mesh_with(&mesh_uri, table.clone()).unwrap();

    // lazily builds part, host and node under the mesh
    let delivered = Arc::new(AtomicUsize::new(0));
    let declined = Arc::new(AtomicUsize::new(0));
    root.push_down(TestPush::boxed(
        &mesh_uri,
        &uri("warp://alpha/agent/1"),
        &delivered,
        &declined,
    ));
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert_eq!(table.phase(), TierPhase::Started);

    root.stop();
    assert_eq!(table.phase(), TierPhase::Stopped);
    for part in table.get_parts() {
        assert_eq!(part.phase(), TierPhase::Stopped);
    }

    root.unload();
    assert_eq!(table.phase(), TierPhase::Unloaded);
}

#[test]
fn close_is_child_initiated_and_clears_network() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    let alpha = uri("warp://alpha");
    let beta = uri("warp://beta");

    let mesh = root.open_mesh(&alpha).unwrap();
    root.open_mesh(&beta).unwrap();
    assert!(Arc::ptr_eq(&root.network().unwrap(), &mesh));

    mesh.close();
    assert_eq!(mesh.phase(), TierPhase::Closed);
    assert!(root.get_mesh(&alpha).is_none());
    // the default network pointed at the closed mesh, so it is cleared
    assert!(root.network().is_none());

    root.set_network(&beta).unwrap();
    assert!(root.network().is_some());
}

#[test]
fn detached_context_chain_declines_and_errors() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    let mesh_uri = uri("warp://alpha");
    let table = MeshTable::new(mesh_uri.clone());
    root.open_mesh_with(&mesh_uri, table.clone()).unwrap();

    assert!(table.schedule().is_ok());
    drop(root);

    assert!(matches!(table.schedule(), Err(RouterErr::Detached)));

    let delivered = Arc::new(AtomicUsize::new(0));
    let declined = Arc::new(AtomicUsize::new(0));
    table.push_up(TestPush::boxed(
        &mesh_uri,
        &uri("warp://alpha/agent/1"),
        &delivered,
        &declined,
    ));
    assert_eq!(declined.load(Ordering::SeqCst), 1);
}

#[test]
fn nodes_route_into_their_partition() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::partitioned()));
    let mesh_uri = uri("warp://alpha");
    let table = MeshTable::new(mesh_uri.clone());
    root.open_mesh_with(&mesh_uri, table.clone()).unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let declined = Arc::new(AtomicUsize::new(0));
    root.push_down(TestPush::boxed(
        &mesh_uri,
        &uri("warp://alpha/red/1"),
        &delivered,
        &declined,
    ));
    root.push_down(TestPush::boxed(
        &mesh_uri,
        &uri("warp://alpha/blue/1"),
        &delivered,
        &declined,
    ));
    root.push_down(TestPush::boxed(
        &mesh_uri,
        &uri("warp://alpha/red/2"),
        &delivered,
        &declined,
    ));
    assert_eq!(delivered.load(Ordering::SeqCst), 3);

    let keys: HashSet<String> = table
        .get_parts()
        .iter()
        .map(|part| part.part_key().to_string())
        .collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains("red"));
    assert!(keys.contains("blue"));
}

#[test]
fn open_mesh_with_rejects_a_bound_key() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    let mesh_uri = uri("warp://alpha");
    root.open_mesh(&mesh_uri).unwrap();

    let replacement = MeshTable::new(mesh_uri.clone());
    let outcome = root.open_mesh_with(&mesh_uri, replacement).unwrap();
    assert!(outcome.is_none());
    assert_eq!(root.get_meshes().len(), 1);
}

#[test]
fn admission_policy_forwards_down_the_chain() {
    trace_init();
    let root = bound_root(Arc::new(TestRootContext::new()));
    let mesh_uri = uri("warp://alpha");
    let table = MeshTable::new(mesh_uri.clone());
    root.open_mesh_with(&mesh_uri, table.clone()).unwrap();

    match table.authenticate(Term::text("creds")).unwrap() {
        PolicyDirective::Allow(identity) => assert_eq!(identity.subject, "anon"),
        other => panic!("expected allow, got {:?}", other),
    }
}
