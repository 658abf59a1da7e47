//! Tick-driven behavior trees for game AI.
//!
//! A behavior tree is declared as a [`NodeDef`] (by hand, or parsed from
//! JSON with [`def::parse_str`]), registered with a [`BehaviorManager`]
//! under a unique name, and advanced once per simulation frame with
//! [`BehaviorManager::update`]. Each tick the tree recomputes priorities
//! bottom-up, arbitrates among children (highest-priority /
//! first-non-zero / random), and drives exactly one leaf [`Action`]
//! through its `start`/`update(dt)`/`terminate` protocol.
//!
//! ```
//! use bramble::{ActionDef, BehaviorManager, DefKind, NodeDef, NodeState};
//!
//! let mut patrol = NodeDef::new("patrol", DefKind::Selector);
//! let mut step = NodeDef::leaf("step", ActionDef::new("step", |_dt| true));
//! step.priority_fn = Some(Box::new(|| 0.8));
//! patrol.children.push(step);
//!
//! let mut manager = BehaviorManager::new();
//! manager.add_tree(patrol)?;
//! manager.start_tree("patrol")?;
//! manager.update(0.016);
//! assert_eq!(manager.tree_state("patrol")?, NodeState::Finished);
//! # Ok::<(), bramble::BehaviorError>(())
//! ```
//!
//! Everything is single-threaded and host-driven: no node or action may
//! block, and time only advances through the `dt` you pass in.

pub mod action;
pub mod def;
pub mod manager;
pub mod node;
pub mod tree;

pub use action::{Action, ActionDef, ActionState, EffectFn, UpdateFn};
pub use def::{DefKind, NodeDef};
pub use manager::BehaviorManager;
pub use node::{Node, NodeState, PriorityFn};
pub use tree::BehaviorTree;

use thiserror::Error;

/// Everything that can go wrong at the control surface.
///
/// Nothing in here is produced *inside* a tick; misuse of the lifecycle
/// primitives is reported before any state is touched, and in-tick
/// invariants are debug assertions instead.
#[derive(Error, Debug)]
pub enum BehaviorError {
    /// A definition broke an arity rule, was missing an action, or used
    /// an unknown node type string.
    #[error("invalid definition `{name}`: {reason}")]
    InvalidDefinition { name: String, reason: String },
    /// `add_tree` was called with a name the manager already holds.
    #[error("a tree named `{0}` already exists")]
    DuplicateName(String),
    /// No tree with that name.
    #[error("no tree named `{0}`")]
    NotFound(String),
    /// A lifecycle primitive was called in the wrong state, e.g. `start`
    /// on a running action or `resume` on a node that isn't paused.
    #[error("cannot {op} `{name}` while {state}")]
    InvalidState {
        op: &'static str,
        name: String,
        state: &'static str,
    },
    /// `remove_tree` on a tree that is still running.
    #[error("tree `{0}` is still running")]
    InUse(String),
}

/// Hooks the log facade up for test runs, so `RUST_LOG=trace cargo test`
/// surfaces the tick narration. Safe to call from every test; only the
/// first call wins.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
