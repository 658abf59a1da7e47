//! Leaf actions: the host-supplied work units a behavior tree drives.
//!
//! An action is a three-phase callback protocol. `on_start` fires once
//! when the owning leaf is selected, `on_update(dt)` fires every tick
//! until it reports completion, and `on_terminate` fires if the action is
//! aborted mid-run (preemption). The runtime assumes callbacks never call
//! back into the tree.

use crate::BehaviorError;

/// Per-tick work callback. Returns `true` once the action has finished.
pub type UpdateFn = Box<dyn FnMut(f32) -> bool>;

/// Edge callback for the start/terminate transitions.
pub type EffectFn = Box<dyn FnMut()>;

/// Action status. Separate from the node state enum because an action
/// that has been terminated or never selected is merely inactive, not
/// uninitialized tree structure.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ActionState {
    #[default]
    Inactive,
    Running,
    Paused,
    Finished,
}

impl ActionState {
    pub(crate) fn label(self) -> &'static str {
        match self {
            ActionState::Inactive => "inactive",
            ActionState::Running => "running",
            ActionState::Paused => "paused",
            ActionState::Finished => "finished",
        }
    }
}

/// The callback triple an [`Action`] is built from.
///
/// `on_update` is required; the edges are optional. Definitions carry
/// boxed closures, so they are attached to a [`crate::NodeDef`]
/// programmatically rather than parsed from JSON.
pub struct ActionDef {
    pub name: String,
    pub on_start: Option<EffectFn>,
    pub on_update: UpdateFn,
    pub on_terminate: Option<EffectFn>,
}

impl std::fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("on_start", &self.on_start.is_some())
            .field("on_update", &"<fn>")
            .field("on_terminate", &self.on_terminate.is_some())
            .finish()
    }
}

impl ActionDef {
    pub fn new(name: impl Into<String>, on_update: impl FnMut(f32) -> bool + 'static) -> Self {
        Self {
            name: name.into(),
            on_start: None,
            on_update: Box::new(on_update),
            on_terminate: None,
        }
    }
}

/// A live action: the callback triple plus its lifecycle state.
pub struct Action {
    name: String,
    state: ActionState,
    on_start: Option<EffectFn>,
    on_update: UpdateFn,
    on_terminate: Option<EffectFn>,
}

impl Action {
    pub fn new(def: ActionDef) -> Self {
        Self {
            name: def.name,
            state: ActionState::Inactive,
            on_start: def.on_start,
            on_update: def.on_update,
            on_terminate: def.on_terminate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    fn expect(&self, state: ActionState, op: &'static str) -> Result<(), BehaviorError> {
        if self.state == state {
            Ok(())
        } else {
            Err(BehaviorError::InvalidState {
                op,
                name: self.name.clone(),
                state: self.state.label(),
            })
        }
    }

    /// Begins running the action, firing `on_start` if one was provided.
    /// The action must be inactive.
    pub fn start(&mut self) -> Result<(), BehaviorError> {
        self.expect(ActionState::Inactive, "start")?;
        self.begin();
        Ok(())
    }

    /// Runs `on_update` for one tick. Does nothing unless the action is
    /// running; returns the state afterwards either way.
    pub fn update(&mut self, dt: f32) -> ActionState {
        if self.state == ActionState::Running {
            self.state = if (self.on_update)(dt) {
                ActionState::Finished
            } else {
                ActionState::Running
            };
        }
        self.state
    }

    /// Aborts a running action, firing `on_terminate` if one was
    /// provided, and returns it to inactive.
    pub fn terminate(&mut self) -> Result<(), BehaviorError> {
        self.expect(ActionState::Running, "terminate")?;
        self.halt();
        Ok(())
    }

    /// Pauses a running action. It will not be updated while paused.
    pub fn pause(&mut self) -> Result<(), BehaviorError> {
        self.expect(ActionState::Running, "pause")?;
        self.state = ActionState::Paused;
        Ok(())
    }

    /// Resumes a paused action.
    pub fn resume(&mut self) -> Result<(), BehaviorError> {
        self.expect(ActionState::Paused, "resume")?;
        self.state = ActionState::Running;
        Ok(())
    }

    /// Returns a finished action to inactive so it can run again.
    pub fn reset(&mut self) -> Result<(), BehaviorError> {
        self.expect(ActionState::Finished, "reset")?;
        self.state = ActionState::Inactive;
        Ok(())
    }

    // The tick path has already checked every precondition by the time it
    // touches an action, so it uses these infallible transitions instead
    // of unwrapping the public ones.

    pub(crate) fn begin(&mut self) {
        debug_assert_eq!(self.state, ActionState::Inactive);
        self.state = ActionState::Running;
        if let Some(f) = self.on_start.as_mut() {
            f();
        }
    }

    pub(crate) fn halt(&mut self) {
        if let Some(f) = self.on_terminate.as_mut() {
            f();
        }
        self.state = ActionState::Inactive;
    }

    pub(crate) fn suspend(&mut self) {
        debug_assert_eq!(self.state, ActionState::Running);
        self.state = ActionState::Paused;
    }

    pub(crate) fn unsuspend(&mut self) {
        debug_assert_eq!(self.state, ActionState::Paused);
        self.state = ActionState::Running;
    }

    pub(crate) fn clear(&mut self) {
        debug_assert_eq!(self.state, ActionState::Finished);
        self.state = ActionState::Inactive;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    fn counting_action(updates_to_finish: u32) -> (Action, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let updates = Rc::new(Cell::new(0));
        let terminates = Rc::new(Cell::new(0));
        let mut def = ActionDef::new("mock", {
            let updates = updates.clone();
            move |_dt| {
                updates.set(updates.get() + 1);
                updates.get() >= updates_to_finish
            }
        });
        def.on_terminate = Some(Box::new({
            let terminates = terminates.clone();
            move || terminates.set(terminates.get() + 1)
        }));
        (Action::new(def), updates, terminates)
    }

    #[test]
    fn lifecycle() {
        let (mut action, updates, _) = counting_action(2);
        assert_eq!(action.state(), ActionState::Inactive);

        action.start().unwrap();
        assert_eq!(action.state(), ActionState::Running);

        assert_eq!(action.update(0.016), ActionState::Running);
        assert_eq!(action.update(0.016), ActionState::Finished);
        assert_eq!(updates.get(), 2);

        // finished actions ignore further updates
        assert_eq!(action.update(0.016), ActionState::Finished);
        assert_eq!(updates.get(), 2);

        action.reset().unwrap();
        assert_eq!(action.state(), ActionState::Inactive);
    }

    #[test]
    fn strict_preconditions() {
        let (mut action, ..) = counting_action(1);

        assert!(matches!(
            action.terminate(),
            Err(BehaviorError::InvalidState { op: "terminate", .. })
        ));
        assert!(action.pause().is_err());
        assert!(action.resume().is_err());
        assert!(action.reset().is_err());

        action.start().unwrap();
        assert!(matches!(
            action.start(),
            Err(BehaviorError::InvalidState { op: "start", .. })
        ));
    }

    #[test]
    fn terminate_fires_callback() {
        let (mut action, updates, terminates) = counting_action(10);
        action.start().unwrap();
        action.update(0.016);
        action.terminate().unwrap();

        assert_eq!(action.state(), ActionState::Inactive);
        assert_eq!(updates.get(), 1);
        assert_eq!(terminates.get(), 1);

        // terminated actions can be restarted from scratch
        action.start().unwrap();
        assert_eq!(action.state(), ActionState::Running);
    }

    #[test]
    fn pause_blocks_updates() {
        let (mut action, updates, _) = counting_action(10);
        action.start().unwrap();
        action.pause().unwrap();

        assert_eq!(action.update(0.016), ActionState::Paused);
        assert_eq!(updates.get(), 0);

        action.resume().unwrap();
        assert_eq!(action.update(0.016), ActionState::Running);
        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn start_fires_callback() {
        let started = Rc::new(Cell::new(false));
        let mut def = ActionDef::new("mock", |_| true);
        def.on_start = Some(Box::new({
            let started = started.clone();
            move || started.set(true)
        }));

        let mut action = Action::new(def);
        action.start().unwrap();
        assert!(started.get());
    }
}
