//! The live tree: an arena of nodes plus the tick engine that drives it.
//!
//! Nodes are stored in a `Vec` in preorder (root at 0, children after
//! their parent) and refer to each other by index, so the parent
//! back-link is a plain handle that can't extend any lifetime. All
//! mutation flows through the tree, either from the tick path or from
//! the control operations (`start`, `pause`, `resume`, `reset`,
//! `preempt`).

use std::fmt;

use itertools::Itertools;
use log::{debug, trace};
use rand::Rng;

use crate::action::{Action, ActionState};
use crate::def::{DefKind, NodeDef};
use crate::node::{
    clamp_unit, Composite, CompositeKind, Decorator, DecoratorKind, Leaf, Node, NodeKind,
    NodeState, Timer,
};
use crate::BehaviorError;

/// A built behavior tree. The root node's name doubles as the tree name.
pub struct BehaviorTree {
    nodes: Vec<Node>,
}

fn invalid(name: &str, reason: &str) -> BehaviorError {
    BehaviorError::InvalidDefinition {
        name: name.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Recursively expands a definition into arena nodes, enforcing arity.
/// Returns the arena index of the node it created.
fn build(
    def: NodeDef,
    parent: Option<usize>,
    offset: usize,
    nodes: &mut Vec<Node>,
) -> Result<usize, BehaviorError> {
    let NodeDef {
        name,
        kind,
        priority_fn,
        preempt,
        uniform_random,
        time_delay,
        delay,
        children,
        action,
    } = def;

    let kind = match kind {
        DefKind::Leaf => {
            if !children.is_empty() {
                return Err(invalid(&name, "a leaf cannot have children"));
            }
            let Some(action) = action else {
                return Err(invalid(&name, "a leaf needs an action"));
            };
            NodeKind::Leaf(Leaf {
                action: Action::new(action),
            })
        }
        DefKind::Inverter => {
            if children.len() != 1 {
                return Err(invalid(&name, "a decorator needs exactly one child"));
            }
            NodeKind::Decorator(Decorator {
                kind: DecoratorKind::Inverter,
                child: usize::MAX,
            })
        }
        DefKind::Timer => {
            if children.len() != 1 {
                return Err(invalid(&name, "a decorator needs exactly one child"));
            }
            if !(delay > 0.0) {
                return Err(invalid(&name, "a timer delay must be positive"));
            }
            NodeKind::Decorator(Decorator {
                kind: DecoratorKind::Timer(Timer {
                    time_delay,
                    delay,
                    current_delay: 0.0,
                    delaying: false,
                }),
                child: usize::MAX,
            })
        }
        DefKind::Priority | DefKind::Selector | DefKind::Random => {
            if children.is_empty() {
                return Err(invalid(&name, "a composite needs at least one child"));
            }
            NodeKind::Composite(Composite {
                kind: match kind {
                    DefKind::Priority => CompositeKind::Priority,
                    DefKind::Selector => CompositeKind::Selector,
                    _ => CompositeKind::Random {
                        uniform: uniform_random,
                    },
                },
                children: Vec::new(),
                preempt,
                active_pos: None,
            })
        }
    };

    // decorators always mirror their child, so a stray priority function
    // on one is dropped here
    let priority_fn = if matches!(kind, NodeKind::Decorator(_)) {
        None
    } else {
        priority_fn
    };

    let id = nodes.len();
    nodes.push(Node {
        name,
        state: NodeState::Uninitialized,
        priority: 0.0,
        priority_fn,
        parent,
        child_offset: offset,
        kind,
    });

    let child_ids = children
        .into_iter()
        .enumerate()
        .map(|(i, c)| build(c, Some(id), i, nodes))
        .collect::<Result<Vec<_>, _>>()?;
    match &mut nodes[id].kind {
        NodeKind::Decorator(d) => d.child = child_ids[0],
        NodeKind::Composite(c) => c.children = child_ids,
        NodeKind::Leaf(_) => {}
    }
    Ok(id)
}

impl BehaviorTree {
    /// Builds a live tree from a definition.
    pub fn new(def: NodeDef) -> Result<Self, BehaviorError> {
        let mut nodes = Vec::new();
        build(def, None, 0, &mut nodes)?;
        Ok(Self { nodes })
    }

    pub fn name(&self) -> &str {
        &self.nodes[0].name
    }

    /// The root state, which is also the state of the tree as a whole.
    pub fn state(&self) -> NodeState {
        self.nodes[0].state
    }

    pub fn priority(&self) -> f32 {
        self.nodes[0].priority
    }

    /// The (first) node with the given name, in preorder.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.find(name).map(|id| &self.nodes[id])
    }

    pub fn state_of(&self, name: &str) -> Option<NodeState> {
        self.node(name).map(Node::state)
    }

    pub fn priority_of(&self, name: &str) -> Option<f32> {
        self.node(name).map(Node::priority)
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Begins running the tree: refreshes every priority, marks the root
    /// running, and advances one path with a zero-length tick. A
    /// finished tree is reset and started over; a running or paused one
    /// refuses.
    pub fn start<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), BehaviorError> {
        match self.state() {
            NodeState::Running | NodeState::Paused => {
                return Err(BehaviorError::InvalidState {
                    op: "start",
                    name: self.name().to_owned(),
                    state: self.state().label(),
                });
            }
            NodeState::Finished => self.reset(),
            NodeState::Uninitialized => {}
        }
        debug!("starting tree `{}`", self.name());
        self.update_priority(0);
        self.nodes[0].set_state(NodeState::Running);
        self.update_node(0, 0.0, rng);
        Ok(())
    }

    /// Advances the tree by `dt` seconds and returns the root state.
    /// Does nothing (beyond running cooldown clocks) unless the tree is
    /// running.
    pub fn update<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) -> NodeState {
        self.advance_cooldowns(dt);
        self.update_node(0, dt, rng)
    }

    /// Aborts the whole tree, terminating any running leaf action on the
    /// way down, and returns every node to uninitialized.
    pub fn preempt(&mut self) {
        debug!("preempting tree `{}`", self.name());
        self.preempt_node(0);
    }

    /// Returns the whole tree to uninitialized and restores build-time
    /// mutable values (timer clocks, active-child slots).
    pub fn reset(&mut self) {
        debug!("resetting tree `{}`", self.name());
        self.reset_node(0);
    }

    /// Pauses the tree. Only running nodes are touched; the rest of the
    /// tree keeps whatever state it had.
    pub fn pause(&mut self) -> Result<(), BehaviorError> {
        if self.state() != NodeState::Running {
            return Err(BehaviorError::InvalidState {
                op: "pause",
                name: self.name().to_owned(),
                state: self.state().label(),
            });
        }
        debug!("pausing tree `{}`", self.name());
        self.pause_node(0);
        Ok(())
    }

    /// Resumes a paused tree. Timers pick up where they left off; no
    /// clock advances while paused.
    pub fn resume(&mut self) -> Result<(), BehaviorError> {
        if self.state() != NodeState::Paused {
            return Err(BehaviorError::InvalidState {
                op: "resume",
                name: self.name().to_owned(),
                state: self.state().label(),
            });
        }
        debug!("resuming tree `{}`", self.name());
        self.resume_node(0);
        Ok(())
    }

    // -- tick internals --

    /// A preempted cooldown timer is off the active path, so nothing
    /// downstream would ever hand it a `dt`. Every armed timer clock is
    /// advanced here instead, exactly once per tick.
    fn advance_cooldowns(&mut self, dt: f32) {
        for node in &mut self.nodes {
            if node.state == NodeState::Paused {
                continue;
            }
            if let NodeKind::Decorator(Decorator {
                kind: DecoratorKind::Timer(timer),
                ..
            }) = &mut node.kind
            {
                if timer.delaying {
                    timer.current_delay += dt;
                    if timer.current_delay >= timer.delay {
                        timer.delaying = false;
                        timer.current_delay = 0.0;
                    }
                }
            }
        }
    }

    fn update_node<R: Rng + ?Sized>(&mut self, id: usize, dt: f32, rng: &mut R) -> NodeState {
        match self.nodes[id].kind {
            NodeKind::Leaf(_) => self.update_leaf(id, dt),
            NodeKind::Decorator(_) => self.update_decorator(id, dt, rng),
            NodeKind::Composite(_) => self.update_composite(id, dt, rng),
        }
    }

    fn update_leaf(&mut self, id: usize, dt: f32) -> NodeState {
        let node = &mut self.nodes[id];
        if node.state != NodeState::Running {
            return node.state;
        }
        let mut finished = false;
        if let NodeKind::Leaf(leaf) = &mut node.kind {
            if leaf.action.state() == ActionState::Inactive {
                leaf.action.begin();
            }
            finished = leaf.action.update(dt) == ActionState::Finished;
        }
        if finished {
            node.set_state(NodeState::Finished);
        }
        node.state
    }

    fn update_decorator<R: Rng + ?Sized>(&mut self, id: usize, dt: f32, rng: &mut R) -> NodeState {
        let child = match &self.nodes[id].kind {
            NodeKind::Decorator(d) => {
                match &d.kind {
                    // while a pre-delay is pending, the child is not ticked
                    DecoratorKind::Timer(timer) => {
                        if self.nodes[id].state != NodeState::Running
                            || (timer.delaying && timer.time_delay)
                        {
                            return self.nodes[id].state;
                        }
                    }
                    DecoratorKind::Inverter => {
                        if matches!(
                            self.nodes[id].state,
                            NodeState::Uninitialized | NodeState::Finished
                        ) {
                            return self.nodes[id].state;
                        }
                    }
                }
                d.child
            }
            _ => return self.nodes[id].state,
        };
        self.nodes[child].set_state(NodeState::Running);
        let state = self.update_node(child, dt, rng);
        self.nodes[id].set_state(state);
        self.nodes[id].state
    }

    /// The arbitration loop. Without preemption a chosen child runs to
    /// completion unchallenged; with it, every tick re-ranks the
    /// children and may swap the active one out, terminating whatever
    /// the old subtree was doing.
    fn update_composite<R: Rng + ?Sized>(&mut self, id: usize, dt: f32, rng: &mut R) -> NodeState {
        if self.nodes[id].state != NodeState::Running {
            return self.nodes[id].state;
        }
        let (preempt, active_pos) = match &self.nodes[id].kind {
            NodeKind::Composite(c) => (c.preempt, c.active_pos),
            _ => return self.nodes[id].state,
        };
        if active_pos.is_some() && preempt {
            self.update_priority(id);
        }
        let active_id = active_pos.map(|pos| self.composite_child(id, pos));

        let next_id = if let (Some(prev), false) = (active_id, preempt) {
            prev
        } else {
            let picked = self.choose_child(id, rng);
            debug_assert!(
                self.nodes[picked].priority > 0.0,
                "`{}` picked zero-priority child `{}`",
                self.nodes[id].name,
                self.nodes[picked].name
            );
            if let Some(prev) = active_id {
                if prev != picked {
                    trace!(
                        "`{}`: `{}` preempted for `{}`",
                        self.nodes[id].name,
                        self.nodes[prev].name,
                        self.nodes[picked].name
                    );
                    self.preempt_node(prev);
                }
            }
            if active_id != Some(picked) {
                if active_id.is_none() {
                    trace!(
                        "`{}` selected `{}`",
                        self.nodes[id].name,
                        self.nodes[picked].name
                    );
                }
                self.nodes[picked].set_state(NodeState::Running);
            }
            let pos = self.nodes[picked].child_offset;
            if let NodeKind::Composite(c) = &mut self.nodes[id].kind {
                c.active_pos = Some(pos);
            }
            picked
        };

        let state = self.update_node(next_id, dt, rng);
        self.nodes[id].set_state(state);
        self.nodes[id].state
    }

    /// Applies this composite's arbitration rule to its children.
    /// Priorities are whatever the last priority pass computed.
    fn choose_child<R: Rng + ?Sized>(&self, id: usize, rng: &mut R) -> usize {
        let c = match &self.nodes[id].kind {
            NodeKind::Composite(c) => c,
            _ => return id,
        };
        match c.kind {
            CompositeKind::Priority => self.top_ranked(&c.children),
            CompositeKind::Selector => c
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].priority > 0.0)
                .unwrap_or(c.children[0]),
            CompositeKind::Random { uniform } => {
                if !uniform {
                    let total: f32 = c.children.iter().map(|&ch| self.nodes[ch].priority).sum();
                    if total > 0.0 {
                        let mut roll = rng.gen_range(0.0..total);
                        for &child in &c.children {
                            if roll < self.nodes[child].priority {
                                return child;
                            }
                            roll -= self.nodes[child].priority;
                        }
                    }
                }
                c.children[rng.gen_range(0..c.children.len())]
            }
        }
    }

    /// Recomputes `priority` bottom-up from this node. Host priority
    /// functions override the derived value; otherwise composites adopt
    /// their active (or would-be-chosen) child and decorators mirror
    /// theirs.
    pub(crate) fn update_priority(&mut self, id: usize) {
        // a cooling-down timer masks its whole subtree
        let cooling = matches!(
            &self.nodes[id].kind,
            NodeKind::Decorator(Decorator {
                kind: DecoratorKind::Timer(Timer {
                    delaying: true,
                    time_delay: false,
                    ..
                }),
                ..
            })
        );
        if cooling {
            self.nodes[id].set_priority(0.0);
            return;
        }
        for i in 0..self.child_count(id) {
            let child = self.child_at(id, i);
            self.update_priority(child);
        }
        let derived = match &self.nodes[id].kind {
            NodeKind::Leaf(_) => 0.0,
            NodeKind::Decorator(d) => self.nodes[d.child].priority,
            NodeKind::Composite(c) => {
                if let Some(pos) = c.active_pos {
                    self.nodes[c.children[pos]].priority
                } else {
                    match c.kind {
                        CompositeKind::Priority => {
                            self.nodes[self.top_ranked(&c.children)].priority
                        }
                        CompositeKind::Selector => c
                            .children
                            .iter()
                            .copied()
                            .find(|&child| self.nodes[child].priority > 0.0)
                            .map(|child| self.nodes[child].priority)
                            .unwrap_or(0.0),
                        CompositeKind::Random { .. } => {
                            let total: f32 =
                                c.children.iter().map(|&ch| self.nodes[ch].priority).sum();
                            total / c.children.len() as f32
                        }
                    }
                }
            }
        };
        let node = &mut self.nodes[id];
        let priority = match node.priority_fn.as_mut() {
            Some(f) => clamp_unit(f()),
            None => derived,
        };
        node.set_priority(priority);
    }

    fn preempt_node(&mut self, id: usize) {
        let mut child = None;
        match &mut self.nodes[id].kind {
            NodeKind::Leaf(leaf) => match leaf.action.state() {
                ActionState::Running | ActionState::Paused => leaf.action.halt(),
                ActionState::Finished => leaf.action.clear(),
                ActionState::Inactive => {}
            },
            NodeKind::Decorator(d) => {
                if let DecoratorKind::Timer(timer) = &mut d.kind {
                    if !timer.time_delay {
                        timer.delaying = true;
                    }
                }
                child = Some(d.child);
            }
            NodeKind::Composite(c) => {
                if let Some(pos) = c.active_pos.take() {
                    child = Some(c.children[pos]);
                }
            }
        }
        if let Some(child) = child {
            self.preempt_node(child);
        }
        self.nodes[id].set_state(NodeState::Uninitialized);
    }

    fn reset_node(&mut self, id: usize) {
        match &mut self.nodes[id].kind {
            NodeKind::Leaf(leaf) => match leaf.action.state() {
                ActionState::Running | ActionState::Paused => leaf.action.halt(),
                ActionState::Finished => leaf.action.clear(),
                ActionState::Inactive => {}
            },
            NodeKind::Decorator(d) => {
                if let DecoratorKind::Timer(timer) = &mut d.kind {
                    timer.delaying = false;
                    timer.current_delay = 0.0;
                }
            }
            NodeKind::Composite(c) => {
                c.active_pos = None;
            }
        }
        for i in 0..self.child_count(id) {
            let child = self.child_at(id, i);
            self.reset_node(child);
        }
        self.nodes[id].set_state(NodeState::Uninitialized);
    }

    fn pause_node(&mut self, id: usize) {
        if let NodeKind::Leaf(leaf) = &mut self.nodes[id].kind {
            if leaf.action.state() == ActionState::Running {
                leaf.action.suspend();
            }
        }
        self.nodes[id].set_state(NodeState::Paused);
        for i in 0..self.child_count(id) {
            let child = self.child_at(id, i);
            if self.nodes[child].state == NodeState::Running {
                self.pause_node(child);
            }
        }
    }

    fn resume_node(&mut self, id: usize) {
        if let NodeKind::Leaf(leaf) = &mut self.nodes[id].kind {
            if leaf.action.state() == ActionState::Paused {
                leaf.action.unsuspend();
            }
        }
        self.nodes[id].set_state(NodeState::Running);
        for i in 0..self.child_count(id) {
            let child = self.child_at(id, i);
            if self.nodes[child].state == NodeState::Paused {
                self.resume_node(child);
            }
        }
    }

    /// Highest-ranked child under the sibling order. Composites are
    /// arity-checked at build time, so `children` is never empty.
    fn top_ranked(&self, children: &[usize]) -> usize {
        children
            .iter()
            .copied()
            .position_max_by(|&a, &b| self.nodes[a].arbitration_rank(&self.nodes[b]))
            .map(|pos| children[pos])
            .unwrap_or_else(|| unreachable!("composites always have children"))
    }

    fn child_count(&self, id: usize) -> usize {
        match &self.nodes[id].kind {
            NodeKind::Leaf(_) => 0,
            NodeKind::Decorator(_) => 1,
            NodeKind::Composite(c) => c.children.len(),
        }
    }

    fn child_at(&self, id: usize, i: usize) -> usize {
        match &self.nodes[id].kind {
            NodeKind::Leaf(_) => unreachable!("leaves have no children"),
            NodeKind::Decorator(d) => d.child,
            NodeKind::Composite(c) => c.children[i],
        }
    }

    fn composite_child(&self, id: usize, pos: usize) -> usize {
        match &self.nodes[id].kind {
            NodeKind::Composite(c) => c.children[pos],
            _ => id,
        }
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: usize, depth: usize) -> fmt::Result {
        let node = &self.nodes[id];
        let detail = match &node.kind {
            NodeKind::Leaf(leaf) => format!("action:{}", leaf.action.name()),
            NodeKind::Decorator(Decorator {
                kind: DecoratorKind::Inverter,
                ..
            }) => "inverter".to_owned(),
            NodeKind::Decorator(Decorator {
                kind: DecoratorKind::Timer(timer),
                ..
            }) => format!(
                "delay type:{}, delay:{}",
                if timer.time_delay { "before" } else { "after" },
                timer.delay
            ),
            NodeKind::Composite(c) => format!(
                "children:[{}]",
                c.children
                    .iter()
                    .map(|&child| self.nodes[child].name.as_str())
                    .join(", ")
            ),
        };
        writeln!(
            f,
            "{:indent$}(name:{}, priority:{:.2}, state:{}, {})",
            "",
            node.name,
            node.priority,
            node.state.label(),
            detail,
            indent = depth * 2
        )?;
        for i in 0..self.child_count(id) {
            self.fmt_node(f, self.child_at(id, i), depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for BehaviorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, 0, 0)
    }
}
