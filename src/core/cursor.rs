/// Cursor tracker — which container currently carries the blinking cursor.
use crate::schema::document::Document;
use crate::schema::node::{NodeId, Path};

/// Remembers the cursor holder by path relative to the terminal root, never
/// by owning reference. The path is re-resolved on every access, so after a
/// tree mutation it may point somewhere else or nowhere.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    last: Option<Path>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the cursor marker to `node`. Returns false (and changes nothing)
    /// when `node` cannot carry the marker: text runs, or nodes outside `root`.
    pub fn mark_active(&mut self, document: &mut Document, root: NodeId, node: NodeId) -> bool {
        if document.element(node).is_none() {
            return false;
        }
        let Some(path) = document.path_to(root, node) else {
            return false;
        };
        self.clear(document, root);
        if let Some(element) = document.element_mut(node) {
            element.cursor = true;
        }
        self.last = Some(path);
        true
    }

    /// Remove the marker from whatever holds it.
    pub fn clear(&mut self, document: &mut Document, root: NodeId) {
        let Some(path) = self.last.take() else {
            return;
        };
        if let Some(element) = document
            .resolve(root, &path)
            .and_then(|id| document.element_mut(id))
        {
            element.cursor = false;
        }
    }

    /// Current holder, if its path still resolves.
    pub fn position(&self, document: &Document, root: NodeId) -> Option<NodeId> {
        self.last
            .as_ref()
            .and_then(|path| document.resolve(root, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::markup::{Markup, TerminalAttrs};

    fn sample() -> (Document, NodeId) {
        let doc = Document::from_markup(&[Markup::terminal(
            "t",
            TerminalAttrs::default(),
            vec![
                Markup::block("p", vec![Markup::text("one")]),
                Markup::block("p", vec![Markup::text("two")]),
            ],
        )]);
        let root = doc.find_by_id("t").unwrap();
        (doc, root)
    }

    fn holders(doc: &Document) -> Vec<NodeId> {
        doc.query(|element| element.cursor)
    }

    #[test]
    fn at_most_one_holder() {
        let (mut doc, root) = sample();
        let first = doc.children(root)[0];
        let second = doc.children(root)[1];
        let mut cursor = CursorTracker::new();

        assert!(cursor.mark_active(&mut doc, root, first));
        assert_eq!(holders(&doc), vec![first]);
        assert!(cursor.mark_active(&mut doc, root, second));
        assert_eq!(holders(&doc), vec![second]);
        assert_eq!(cursor.position(&doc, root), Some(second));
    }

    #[test]
    fn text_runs_are_not_targets() {
        let (mut doc, root) = sample();
        let first = doc.children(root)[0];
        let text = doc.children(first)[0];
        let mut cursor = CursorTracker::new();

        cursor.mark_active(&mut doc, root, first);
        assert!(!cursor.mark_active(&mut doc, root, text));
        assert_eq!(holders(&doc), vec![first]);
    }

    #[test]
    fn root_can_hold_the_cursor() {
        let (mut doc, root) = sample();
        let mut cursor = CursorTracker::new();
        assert!(cursor.mark_active(&mut doc, root, root));
        cursor.clear(&mut doc, root);
        assert!(holders(&doc).is_empty());
        assert_eq!(cursor.position(&doc, root), None);
    }
}
