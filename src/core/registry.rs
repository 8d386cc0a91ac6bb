/// Fragment registry — identifier lookups for reveal fragments.
use rustc_hash::FxHashMap;

use crate::schema::markup::Markup;
use crate::schema::node::NodeId;

/// Maps fragment identifiers to the terminals that carry them. The first
/// terminal registered under an id wins, like a document-order id lookup.
#[derive(Debug, Clone, Default)]
pub struct FragmentRegistry {
    by_id: FxHashMap<String, NodeId>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when `id` was already taken.
    pub fn register(&mut self, id: &str, node: NodeId) -> bool {
        if self.by_id.contains_key(id) {
            log::warn!("duplicate fragment id '{}' on {:?}; keeping the first", id, node);
            return false;
        }
        self.by_id.insert(id.to_string(), node);
        true
    }

    /// Drop every id pointing at `node`.
    pub fn unregister(&mut self, node: NodeId) {
        self.by_id.retain(|_, registered| *registered != node);
    }

    pub fn get(&self, id: &str) -> Option<NodeId> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Prepare an authored fragment for insertion elsewhere: the copy must not
/// carry the original's identity.
pub fn detached_copy(original: &Markup) -> Markup {
    let mut copy = original.clone();
    if let Markup::Terminal { id, .. } = &mut copy {
        *id = None;
    }
    copy
}

/// A global command instance: no identity, no entry button, plays on its own.
pub fn global_copy(original: &Markup) -> Markup {
    let mut copy = detached_copy(original);
    if let Markup::Terminal { attrs, .. } = &mut copy {
        attrs.show_button = false;
        attrs.autoplay = true;
    }
    copy
}
