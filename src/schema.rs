//! Slot schema files.
//!
//! A schema is an XML document in which every element carrying a `type`
//! attribute declares one slot:
//!
//! ```xml
//! <slots>
//!   <tracker>
//!     <head>
//!       <pos type="sfvec3f"/>
//!       <slot name="ori" type="sfrotation"/>
//!     </head>
//!   </tracker>
//! </slots>
//! ```
//!
//! The label is the `name` attribute, or the tag name when absent. The
//! namespace joins the names of all ancestors below the document root.

use crate::error::{HubError, HubResult};
use crate::event::{join_scope, TypeTag};
use roxmltree::{Document, Node};
use std::path::Path;

/// One declared slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotDef {
    /// Namespace part of the scope.
    pub namespace: String,
    /// Label part of the scope.
    pub label: String,
    /// Declared value type.
    pub type_tag: TypeTag,
}

impl SlotDef {
    /// Build a slot definition.
    pub fn new(namespace: impl Into<String>, label: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            namespace: namespace.into(),
            label: label.into(),
            type_tag,
        }
    }

    /// `namespace/label`.
    pub fn scope(&self) -> String {
        join_scope(&self.namespace, &self.label)
    }
}

/// Ordered list of slots, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotSchema {
    slots: Vec<SlotDef>,
}

fn node_name<'a>(node: &Node<'a, '_>) -> &'a str {
    node.attribute("name")
        .unwrap_or_else(|| node.tag_name().name())
}

impl SlotSchema {
    /// Schema from an explicit list.
    pub fn from_slots(slots: Vec<SlotDef>) -> Self {
        Self { slots }
    }

    /// Load and parse a schema file.
    pub fn load(path: &Path) -> HubResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HubError::Schema(format!("cannot read {}: {e}", path.display()))
        })?;
        let schema = Self::parse(&text)?;
        tracing::info!(path = %path.display(), slots = schema.len(), "loaded slot schema");
        Ok(schema)
    }

    /// Parse schema XML.
    pub fn parse(text: &str) -> HubResult<Self> {
        let doc = Document::parse(text)?;
        let root = doc.root_element();
        let mut slots = Vec::new();
        for node in root.descendants().filter(|n| n.is_element()) {
            let Some(type_name) = node.attribute("type") else {
                continue;
            };
            let type_tag: TypeTag = type_name.parse().map_err(|e: String| {
                HubError::Schema(format!("slot '{}': {e}", node_name(&node)))
            })?;
            let mut path: Vec<&str> = node
                .ancestors()
                .skip(1)
                .filter(|n| n.is_element() && *n != root)
                .map(|n| node_name(&n))
                .collect();
            path.reverse();
            slots.push(SlotDef::new(path.join("/"), node_name(&node), type_tag));
        }
        Ok(Self { slots })
    }

    /// Slots in declaration order.
    pub fn slots(&self) -> &[SlotDef] {
        &self.slots
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the schema declares nothing.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Look a slot up by scope.
    pub fn find(&self, scope: &str) -> Option<&SlotDef> {
        self.slots.iter().find(|s| s.scope() == scope)
    }
}
