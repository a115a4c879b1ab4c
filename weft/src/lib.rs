//! A hierarchical runtime for addressable, stateful web agents.
//!
//! The routing tree is four tiers deep: a [`router::root::RootTable`] binds
//! meshes, a mesh binds partitions, a partition binds hosts, a host binds
//! nodes, and each node fronts one application agent. Bindings are created
//! lazily on first touch, concurrently safe (exactly one binding per key no
//! matter how many threads race), and torn down child-first through the
//! [`tier`] lifecycle protocol.
//!
//! Messages move as pushes: `push_down` resolves one tier per hop, creating
//! it if need be, and ends in exactly one of delivery or decline; `push_up`
//! climbs to the root and turns around. Uplinks never fail to bind: an
//! unresolvable address gets an error stub as its link context.
//!
//! The [`expr`] module carries the selector and expression engine agents
//! use against their [`term::Term`] state: an incremental parser that
//! accepts input in arbitrary chunks, a resumable byte-budget writer, and
//! lazy selector streams.

pub mod expr;
pub mod router;
pub mod term;
pub mod tier;
pub mod uri;

pub use expr::{parse_expr, render, Evaluator, Expr, ExprError, ExprParser, ExprWriter};
pub use router::capability::{Push, PushRequest};
pub use router::root::{RootContext, RootTable};
pub use router::{Router, RouterErr, TableRouter};
pub use term::{Item, Term};
pub use tier::{TierBinding, TierPhase};
pub use uri::Uri;
