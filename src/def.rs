//! Tree definitions and the JSON front-end.
//!
//! A [`NodeDef`] is the buildable description of a tree: shape,
//! per-node parameters, and the host-attached callbacks. Definitions can
//! be written in code or parsed from JSON (see [`parse_str`]); since
//! closures don't serialize, priority functions and actions are always
//! attached programmatically afterwards, typically via
//! [`NodeDef::node_mut`].

use std::collections::HashMap;

use serde::Deserialize;

use crate::action::ActionDef;
use crate::node::PriorityFn;
use crate::BehaviorError;

/// The node shapes a definition can declare.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DefKind {
    Priority,
    Selector,
    Random,
    Inverter,
    Timer,
    Leaf,
}

impl DefKind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "priority" => DefKind::Priority,
            "selector" => DefKind::Selector,
            "random" => DefKind::Random,
            "inverter" => DefKind::Inverter,
            "timer" => DefKind::Timer,
            "leaf" => DefKind::Leaf,
            _ => return None,
        })
    }
}

/// A recursive tree definition, consumed by
/// [`crate::BehaviorManager::add_tree`].
///
/// Fields that don't apply to a node's kind are simply ignored by the
/// builder (a leaf's `preempt`, say). Arity rules *are* enforced there:
/// composites want at least one child, decorators exactly one, leaves
/// none plus an action.
pub struct NodeDef {
    pub name: String,
    pub kind: DefKind,
    /// Overrides the derived priority when present. Decorators never
    /// consult it; they always mirror their child.
    pub priority_fn: Option<PriorityFn>,
    /// Composites only: whether the running child can be swapped out.
    pub preempt: bool,
    /// Random only: uniform choice instead of priority-weighted.
    pub uniform_random: bool,
    /// Timer only: delay before the child runs (`true`) or cool down
    /// after preemption (`false`).
    pub time_delay: bool,
    /// Timer only: the delay length in seconds.
    pub delay: f32,
    pub children: Vec<NodeDef>,
    /// Leaves only, and required there.
    pub action: Option<ActionDef>,
}

impl std::fmt::Debug for NodeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority_fn", &self.priority_fn.is_some())
            .field("preempt", &self.preempt)
            .field("uniform_random", &self.uniform_random)
            .field("time_delay", &self.time_delay)
            .field("delay", &self.delay)
            .field("children", &self.children)
            .field("action", &self.action)
            .finish()
    }
}

impl NodeDef {
    pub fn new(name: impl Into<String>, kind: DefKind) -> Self {
        Self {
            name: name.into(),
            kind,
            priority_fn: None,
            preempt: false,
            uniform_random: true,
            time_delay: true,
            delay: 1.0,
            children: Vec::new(),
            action: None,
        }
    }

    pub fn leaf(name: impl Into<String>, action: ActionDef) -> Self {
        let mut def = Self::new(name, DefKind::Leaf);
        def.action = Some(action);
        def
    }

    /// Finds the (first) definition with the given name, searching down
    /// from this one. Names should be unique within a tree; duplicates
    /// resolve to whichever comes first in definition order.
    pub fn node_mut(&mut self, name: &str) -> Option<&mut NodeDef> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.node_mut(name))
    }
}

// Raw mirror of the wire format. Callbacks can't appear here, and the
// node name is the enclosing object key rather than a field.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    preempt: bool,
    #[serde(default = "default_true")]
    uniform_random: bool,
    #[serde(default = "default_true")]
    time_delay: bool,
    #[serde(default = "default_delay")]
    delay: f32,
    #[serde(default)]
    children: Vec<HashMap<String, RawNode>>,
}

fn default_true() -> bool {
    true
}

fn default_delay() -> f32 {
    1.0
}

/// Parses a JSON document of the form `{"<name>": {"type": ..., ...}}`
/// into a definition with no callbacks attached.
pub fn parse_str(doc: &str) -> Result<NodeDef, BehaviorError> {
    let doc: HashMap<String, RawNode> =
        serde_json::from_str(doc).map_err(|e| BehaviorError::InvalidDefinition {
            name: "<document>".into(),
            reason: e.to_string(),
        })?;
    convert_entry(doc, "<document>")
}

/// Like [`parse_str`], for an already-parsed [`serde_json::Value`].
pub fn parse_value(value: serde_json::Value) -> Result<NodeDef, BehaviorError> {
    let doc: HashMap<String, RawNode> =
        serde_json::from_value(value).map_err(|e| BehaviorError::InvalidDefinition {
            name: "<document>".into(),
            reason: e.to_string(),
        })?;
    convert_entry(doc, "<document>")
}

fn convert_entry(
    entry: HashMap<String, RawNode>,
    context: &str,
) -> Result<NodeDef, BehaviorError> {
    if entry.len() != 1 {
        return Err(BehaviorError::InvalidDefinition {
            name: context.into(),
            reason: format!("expected exactly one named node, found {}", entry.len()),
        });
    }
    match entry.into_iter().next() {
        Some((name, raw)) => convert(name, raw),
        None => Err(BehaviorError::InvalidDefinition {
            name: context.into(),
            reason: "empty node object".into(),
        }),
    }
}

fn convert(name: String, raw: RawNode) -> Result<NodeDef, BehaviorError> {
    let Some(kind) = DefKind::parse(&raw.kind) else {
        return Err(BehaviorError::InvalidDefinition {
            name,
            reason: format!("unknown node type `{}`", raw.kind),
        });
    };
    let children = raw
        .children
        .into_iter()
        .map(|c| convert_entry(c, &name))
        .collect::<Result<Vec<_>, _>>()?;

    let mut def = NodeDef::new(name, kind);
    def.preempt = raw.preempt;
    def.uniform_random = raw.uniform_random;
    def.time_delay = raw.time_delay;
    def.delay = raw.delay;
    def.children = children;
    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionDef;

    const DOC: &str = r#"
    {
        "root": {
            "type": "priority",
            "preempt": true,
            "children": [
                { "wander": { "type": "leaf" } },
                { "cooldown": {
                    "type": "timer",
                    "timeDelay": false,
                    "delay": 2.5,
                    "children": [ { "attack": { "type": "leaf" } } ]
                } }
            ]
        }
    }
    "#;

    #[test]
    fn parses_shape_and_defaults() {
        let def = parse_str(DOC).unwrap();
        assert_eq!(def.name, "root");
        assert_eq!(def.kind, DefKind::Priority);
        assert!(def.preempt);
        // untouched by the document, so wire defaults
        assert!(def.uniform_random);
        assert_eq!(def.delay, 1.0);

        assert_eq!(def.children.len(), 2);
        assert_eq!(def.children[0].name, "wander");
        assert_eq!(def.children[0].kind, DefKind::Leaf);

        let cooldown = &def.children[1];
        assert_eq!(cooldown.kind, DefKind::Timer);
        assert!(!cooldown.time_delay);
        assert_eq!(cooldown.delay, 2.5);
        assert_eq!(cooldown.children[0].name, "attack");
    }

    #[test]
    fn unknown_type_is_invalid() {
        let err = parse_str(r#"{ "x": { "type": "parallel" } }"#).unwrap_err();
        assert!(matches!(
            err,
            BehaviorError::InvalidDefinition { ref name, .. } if name == "x"
        ));
    }

    #[test]
    fn multi_key_node_is_invalid() {
        let doc = r#"
        {
            "root": {
                "type": "selector",
                "children": [
                    { "a": { "type": "leaf" }, "b": { "type": "leaf" } }
                ]
            }
        }
        "#;
        assert!(matches!(
            parse_str(doc),
            Err(BehaviorError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(parse_str("not json").is_err());
        assert!(parse_str(r#"{ "x": { } }"#).is_err());
    }

    #[test]
    fn node_mut_finds_nested() {
        let mut def = parse_str(DOC).unwrap();
        let attack = def.node_mut("attack").unwrap();
        assert_eq!(attack.kind, DefKind::Leaf);

        attack.action = Some(ActionDef::new("attack", |_| true));
        attack.priority_fn = Some(Box::new(|| 0.9));

        assert!(def.node_mut("nope").is_none());
    }
}
