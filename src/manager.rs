//! The manager: owns built trees by name and drives them each frame.
//!
//! Trees never interact, and no order is promised between them within a
//! tick. The manager is also where the random sampling capability lives;
//! nothing deeper in the runtime reaches for a global RNG.

use std::collections::HashMap;

use log::debug;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::def::NodeDef;
use crate::node::NodeState;
use crate::tree::BehaviorTree;
use crate::BehaviorError;

/// Owns and ticks a set of named behavior trees.
pub struct BehaviorManager {
    trees: HashMap<String, BehaviorTree>,
    rng: Box<dyn RngCore>,
}

impl Default for BehaviorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BehaviorManager {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Supplies the random source used by random composites. Hand in a
    /// seeded `StdRng` for reproducible runs.
    pub fn with_rng(rng: impl RngCore + 'static) -> Self {
        Self {
            trees: HashMap::new(),
            rng: Box::new(rng),
        }
    }

    /// Builds a tree from a definition and registers it under the
    /// definition's name. The name must be unique in this manager.
    pub fn add_tree(&mut self, def: NodeDef) -> Result<(), BehaviorError> {
        if self.trees.contains_key(&def.name) {
            return Err(BehaviorError::DuplicateName(def.name));
        }
        let tree = BehaviorTree::new(def)?;
        debug!("added tree `{}`", tree.name());
        self.trees.insert(tree.name().to_owned(), tree);
        Ok(())
    }

    /// The tree with the given name.
    pub fn get_tree(&self, name: &str) -> Result<&BehaviorTree, BehaviorError> {
        self.trees
            .get(name)
            .ok_or_else(|| BehaviorError::NotFound(name.to_owned()))
    }

    /// State of the named tree (i.e. of its root node).
    pub fn tree_state(&self, name: &str) -> Result<NodeState, BehaviorError> {
        self.get_tree(name).map(BehaviorTree::state)
    }

    /// Discards the named tree. Running trees refuse; preempt or pause
    /// them first.
    pub fn remove_tree(&mut self, name: &str) -> Result<(), BehaviorError> {
        let tree = self
            .trees
            .get(name)
            .ok_or_else(|| BehaviorError::NotFound(name.to_owned()))?;
        if tree.state() == NodeState::Running {
            return Err(BehaviorError::InUse(name.to_owned()));
        }
        self.trees.remove(name);
        debug!("removed tree `{name}`");
        Ok(())
    }

    pub fn start_tree(&mut self, name: &str) -> Result<(), BehaviorError> {
        let tree = self
            .trees
            .get_mut(name)
            .ok_or_else(|| BehaviorError::NotFound(name.to_owned()))?;
        tree.start(&mut self.rng)
    }

    /// Cancels the named tree, terminating any running leaf action.
    pub fn preempt_tree(&mut self, name: &str) -> Result<(), BehaviorError> {
        self.tree_mut(name)?.preempt();
        Ok(())
    }

    /// Returns the named tree to its initial configuration.
    pub fn reset_tree(&mut self, name: &str) -> Result<(), BehaviorError> {
        self.tree_mut(name)?.reset();
        Ok(())
    }

    pub fn pause_tree(&mut self, name: &str) -> Result<(), BehaviorError> {
        self.tree_mut(name)?.pause()
    }

    pub fn resume_tree(&mut self, name: &str) -> Result<(), BehaviorError> {
        self.tree_mut(name)?.resume()
    }

    /// Advances every running tree by `dt` seconds. One call of this per
    /// simulation frame is the only thing that makes time pass.
    pub fn update(&mut self, dt: f32) {
        for tree in self.trees.values_mut() {
            if tree.state() == NodeState::Running
                && tree.update(dt, &mut self.rng) == NodeState::Finished
            {
                debug!("tree `{}` finished", tree.name());
            }
        }
    }

    fn tree_mut(&mut self, name: &str) -> Result<&mut BehaviorTree, BehaviorError> {
        self.trees
            .get_mut(name)
            .ok_or_else(|| BehaviorError::NotFound(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::action::ActionDef;
    use crate::def::{self, DefKind};

    fn manager() -> BehaviorManager {
        crate::init_test_logging();
        BehaviorManager::with_rng(StdRng::seed_from_u64(7))
    }

    /// One selector over one leaf that finishes after `n` updates.
    fn simple_def(name: &str, n: u32) -> (NodeDef, Rc<Cell<u32>>) {
        let updates = Rc::new(Cell::new(0));
        let mut leaf = NodeDef::leaf(format!("{name}-leaf"), {
            let updates = updates.clone();
            ActionDef::new(format!("{name}-act"), move |_| {
                updates.set(updates.get() + 1);
                n != 0 && updates.get() >= n
            })
        });
        leaf.priority_fn = Some(Box::new(|| 0.6));
        let mut root = NodeDef::new(name, DefKind::Selector);
        root.children.push(leaf);
        (root, updates)
    }

    #[test]
    fn duplicate_names_refuse() {
        let mut manager = manager();
        manager.add_tree(simple_def("guard", 1).0).unwrap();
        assert!(matches!(
            manager.add_tree(simple_def("guard", 1).0),
            Err(BehaviorError::DuplicateName(name)) if name == "guard"
        ));
    }

    #[test]
    fn unknown_names_refuse() {
        let mut manager = manager();
        assert!(matches!(
            manager.start_tree("ghost"),
            Err(BehaviorError::NotFound(_))
        ));
        assert!(manager.get_tree("ghost").is_err());
        assert!(manager.tree_state("ghost").is_err());
        assert!(manager.remove_tree("ghost").is_err());
    }

    #[test]
    fn invalid_defs_never_land() {
        let mut manager = manager();
        let bad = NodeDef::new("bad", DefKind::Priority); // no children
        assert!(manager.add_tree(bad).is_err());
        assert!(manager.get_tree("bad").is_err());
    }

    #[test]
    fn update_drives_only_running_trees() {
        let mut manager = manager();
        let (def_a, updates_a) = simple_def("a", 3);
        let (def_b, updates_b) = simple_def("b", 3);
        manager.add_tree(def_a).unwrap();
        manager.add_tree(def_b).unwrap();

        manager.start_tree("a").unwrap();
        manager.update(0.016);

        assert_eq!(updates_a.get(), 2); // start tick + one frame
        assert_eq!(updates_b.get(), 0);
        assert_eq!(manager.tree_state("a").unwrap(), NodeState::Running);
        assert_eq!(manager.tree_state("b").unwrap(), NodeState::Uninitialized);

        manager.update(0.016);
        assert_eq!(manager.tree_state("a").unwrap(), NodeState::Finished);

        // finished trees sit still until restarted
        manager.update(0.016);
        assert_eq!(updates_a.get(), 3);
    }

    #[test]
    fn remove_refuses_running() {
        let mut manager = manager();
        manager.add_tree(simple_def("guard", 0).0).unwrap();
        manager.start_tree("guard").unwrap();

        assert!(matches!(
            manager.remove_tree("guard"),
            Err(BehaviorError::InUse(_))
        ));

        manager.preempt_tree("guard").unwrap();
        manager.remove_tree("guard").unwrap();
        assert!(manager.get_tree("guard").is_err());
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let mut manager = manager();
        let (def, updates) = simple_def("guard", 0);
        manager.add_tree(def).unwrap();
        manager.start_tree("guard").unwrap();

        manager.pause_tree("guard").unwrap();
        assert_eq!(manager.tree_state("guard").unwrap(), NodeState::Paused);

        let before = updates.get();
        manager.update(0.016);
        assert_eq!(updates.get(), before);

        manager.resume_tree("guard").unwrap();
        manager.update(0.016);
        assert_eq!(updates.get(), before + 1);
    }

    #[test]
    fn reset_allows_rerun() {
        let mut manager = manager();
        let (def, updates) = simple_def("guard", 1);
        manager.add_tree(def).unwrap();
        manager.start_tree("guard").unwrap();
        assert_eq!(manager.tree_state("guard").unwrap(), NodeState::Finished);

        manager.reset_tree("guard").unwrap();
        assert_eq!(
            manager.tree_state("guard").unwrap(),
            NodeState::Uninitialized
        );

        manager.start_tree("guard").unwrap();
        assert_eq!(updates.get(), 2);
    }

    #[test]
    fn json_front_end_round_trip() {
        let doc = r#"
        {
            "sentry": {
                "type": "priority",
                "preempt": true,
                "children": [
                    { "watch": { "type": "leaf" } },
                    { "chase": { "type": "leaf" } }
                ]
            }
        }
        "#;
        let mut def = def::parse_str(doc).unwrap();

        let watched = Rc::new(Cell::new(0u32));
        let watch = def.node_mut("watch").unwrap();
        watch.priority_fn = Some(Box::new(|| 0.8));
        watch.action = Some(ActionDef::new("watch", {
            let watched = watched.clone();
            move |_| {
                watched.set(watched.get() + 1);
                false
            }
        }));
        let chase = def.node_mut("chase").unwrap();
        chase.priority_fn = Some(Box::new(|| 0.2));
        chase.action = Some(ActionDef::new("chase", |_| false));

        let mut manager = manager();
        manager.add_tree(def).unwrap();
        manager.start_tree("sentry").unwrap();
        manager.update(0.016);

        assert_eq!(manager.tree_state("sentry").unwrap(), NodeState::Running);
        assert_eq!(watched.get(), 2);
        assert_eq!(
            manager.get_tree("sentry").unwrap().state_of("chase"),
            Some(NodeState::Uninitialized)
        );
    }
}
