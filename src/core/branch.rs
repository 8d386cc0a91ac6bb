/// Branch controller — one question, its answer and how the answer resolves.
use thiserror::Error;

use crate::core::registry::FragmentRegistry;
use crate::schema::document::Document;
use crate::schema::markup::FormAttrs;
use crate::schema::node::{ElementKind, NodeId};

#[derive(Debug, Error)]
pub enum BranchError {
    #[error("question {0:?} has no label")]
    MissingLabel(NodeId),
    #[error("node {0:?} is not a question")]
    NotAForm(NodeId),
    #[error("question {0:?} has no target to resolve answers against")]
    NoTarget(NodeId),
    #[error("question {node:?} is not editable ({state:?})")]
    NotEditable { node: NodeId, state: BranchState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Editable,
    /// Answer captured, resolution pending.
    Submitted,
    /// The answer's fragment is playing.
    Transitioning,
    Readonly,
    /// A history copy holding an answer that a detour interrupted.
    Superseded,
}

/// The answer receptacle of a question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
    pub value: String,
    pub readonly: bool,
}

/// Collapse common spellings onto the ids authors actually write.
pub fn normalize_alias(value: &str) -> String {
    let lowered = value.to_lowercase();
    match lowered.as_str() {
        "yes" => "y".to_string(),
        "no" => "n".to_string(),
        "?" => "help".to_string(),
        _ => lowered,
    }
}

/// One question of the dialogue.
#[derive(Debug, Clone)]
pub struct BranchPoint {
    node: NodeId,
    label: String,
    attrs: FormAttrs,
    input: Input,
    state: BranchState,
    /// Waiting for a transition into it to complete.
    pub active: bool,
}

impl BranchPoint {
    /// Build the controller for the question at `node`. A question without
    /// a label is an authoring error.
    pub fn attach(document: &Document, node: NodeId) -> Result<BranchPoint, BranchError> {
        let attrs = match document.element(node).map(|element| &element.kind) {
            Some(ElementKind::Form(attrs)) => attrs.clone(),
            _ => return Err(BranchError::NotAForm(node)),
        };
        let label = attrs
            .label
            .clone()
            .filter(|label| !label.is_empty())
            .ok_or(BranchError::MissingLabel(node))?;
        Ok(BranchPoint {
            node,
            label,
            attrs,
            input: Input::default(),
            state: BranchState::Editable,
            active: false,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn attrs(&self) -> &FormAttrs {
        &self.attrs
    }

    pub fn state(&self) -> BranchState {
        self.state
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    /// Questions with a target accept typed answers; the others are
    /// answered by the choice group that follows them.
    pub fn accepts_typing(&self) -> bool {
        self.attrs.target.is_some()
    }

    pub fn value(&self) -> &str {
        &self.input.value
    }

    pub fn autofocus(&self) -> bool {
        self.attrs.autofocus
    }

    /// Typing into the question. Ignored once the input is locked.
    pub fn type_value(&mut self, value: &str) -> Result<(), BranchError> {
        if !self.accepts_typing() {
            return Err(BranchError::NoTarget(self.node));
        }
        if self.input.readonly || self.state != BranchState::Editable {
            return Err(BranchError::NotEditable {
                node: self.node,
                state: self.state,
            });
        }
        self.input.value = value.to_string();
        Ok(())
    }

    /// Record an answer chosen elsewhere (a choice group). Stored lowercased.
    pub fn set_value(&mut self, value: &str) -> Result<(), BranchError> {
        if self.input.readonly {
            return Err(BranchError::NotEditable {
                node: self.node,
                state: self.state,
            });
        }
        self.input.value = value.to_lowercase();
        Ok(())
    }

    /// Still waiting for its answer.
    pub fn is_open(&self) -> bool {
        !self.input.readonly
            && matches!(self.state, BranchState::Editable | BranchState::Submitted)
    }

    /// Capture the current value for resolution.
    pub fn submit(&mut self) -> Result<String, BranchError> {
        if !self.accepts_typing() {
            return Err(BranchError::NoTarget(self.node));
        }
        if self.state != BranchState::Editable {
            return Err(BranchError::NotEditable {
                node: self.node,
                state: self.state,
            });
        }
        self.state = BranchState::Submitted;
        Ok(self.value().to_string())
    }

    /// Ids to try for `raw`, most specific first.
    pub fn candidates(&self, raw: &str) -> Vec<String> {
        let Some(target) = self.attrs.target.as_deref() else {
            return Vec::new();
        };
        let value = normalize_alias(raw);
        if value.is_empty() {
            let namespace = self.attrs.fallback.as_deref().unwrap_or(target);
            return vec![format!("{}-default", namespace)];
        }
        let invalid = self.attrs.invalid.as_deref().unwrap_or(target);
        vec![
            format!("{}-{}", target, value),
            format!("{}-invalid", invalid),
        ]
    }

    /// The fragment `raw` leads to, if any.
    pub fn resolve(&self, raw: &str, registry: &FragmentRegistry) -> Option<(String, NodeId)> {
        self.candidates(raw)
            .into_iter()
            .find_map(|id| registry.get(&id).map(|node| (id, node)))
    }

    /// Resolution failed: the question stays answerable.
    pub fn reopen(&mut self) {
        self.state = BranchState::Editable;
    }

    /// The answer was accepted; input locks while its fragment plays.
    pub fn begin_transition(&mut self) {
        self.state = BranchState::Transitioning;
        self.lock();
    }

    /// The answer's fragment finished.
    pub fn settle(&mut self) {
        if self.state == BranchState::Transitioning {
            self.state = BranchState::Readonly;
        }
    }

    /// Locked by a choice, no fragment of its own to wait for.
    pub fn finish(&mut self) {
        self.state = BranchState::Readonly;
        self.lock();
    }

    /// Turn this question into a history copy of an interrupted answer.
    pub fn supersede(&mut self, value: &str) {
        self.input.value = value.to_lowercase();
        self.state = BranchState::Superseded;
        self.lock();
    }

    /// Empty the input. A question that was not answered yet can be asked
    /// again; an answered one stays locked.
    pub fn clear(&mut self) {
        self.input.value.clear();
        if self.is_open() {
            self.input.readonly = false;
            self.state = BranchState::Editable;
        }
    }

    fn lock(&mut self) {
        self.input.readonly = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::markup::Markup;

    fn question(attrs: FormAttrs) -> (Document, NodeId) {
        let doc = Document::from_markup(&[Markup::form(attrs)]);
        let node = doc.children(doc.root())[0];
        (doc, node)
    }

    fn command_line() -> FormAttrs {
        FormAttrs {
            label: Some("> ".to_string()),
            target: Some("cmd".to_string()),
            ..FormAttrs::default()
        }
    }

    fn registry(ids: &[&str]) -> FragmentRegistry {
        let mut registry = FragmentRegistry::new();
        for (i, id) in ids.iter().enumerate() {
            registry.register(id, NodeId(100 + i));
        }
        registry
    }

    #[test]
    fn missing_label_is_fatal() {
        let (doc, node) = question(FormAttrs {
            target: Some("cmd".to_string()),
            ..FormAttrs::default()
        });
        assert!(matches!(
            BranchPoint::attach(&doc, node),
            Err(BranchError::MissingLabel(_))
        ));
    }

    #[test]
    fn aliases_normalize() {
        assert_eq!(normalize_alias("YES"), "y");
        assert_eq!(normalize_alias("no"), "n");
        assert_eq!(normalize_alias("?"), "help");
        assert_eq!(normalize_alias("Look"), "look");
    }

    #[test]
    fn alias_resolves_like_the_short_form() {
        let (doc, node) = question(command_line());
        let branch = BranchPoint::attach(&doc, node).unwrap();
        let registry = registry(&["cmd-y", "cmd-help"]);
        assert_eq!(
            branch.resolve("yes", &registry),
            branch.resolve("y", &registry)
        );
        assert_eq!(
            branch.resolve("?", &registry),
            branch.resolve("help", &registry)
        );
        assert!(branch.resolve("yes", &registry).is_some());
    }

    #[test]
    fn exact_match_beats_invalid() {
        let (doc, node) = question(FormAttrs {
            label: Some("> ".to_string()),
            target: Some("q".to_string()),
            ..FormAttrs::default()
        });
        let branch = BranchPoint::attach(&doc, node).unwrap();
        let registry = registry(&["q-invalid", "q-a"]);
        let (id, _) = branch.resolve("a", &registry).unwrap();
        assert_eq!(id, "q-a");
        let (id, _) = branch.resolve("zzz", &registry).unwrap();
        assert_eq!(id, "q-invalid");
    }

    #[test]
    fn empty_value_uses_default_only() {
        let (doc, node) = question(command_line());
        let branch = BranchPoint::attach(&doc, node).unwrap();
        assert_eq!(branch.candidates(""), vec!["cmd-default".to_string()]);
        let registry = registry(&["cmd-invalid"]);
        assert_eq!(branch.resolve("", &registry), None);
    }

    #[test]
    fn fallback_and_invalid_namespaces() {
        let (doc, node) = question(FormAttrs {
            fallback: Some("shared".to_string()),
            invalid: Some("oops".to_string()),
            ..command_line()
        });
        let branch = BranchPoint::attach(&doc, node).unwrap();
        assert_eq!(branch.candidates(""), vec!["shared-default".to_string()]);
        assert_eq!(
            branch.candidates("x"),
            vec!["cmd-x".to_string(), "oops-invalid".to_string()]
        );
    }

    #[test]
    fn unmatched_answer_without_handler_resolves_nothing() {
        let (doc, node) = question(command_line());
        let branch = BranchPoint::attach(&doc, node).unwrap();
        assert_eq!(branch.resolve("dance", &registry(&["cmd-look"])), None);
    }

    #[test]
    fn state_machine() {
        let (doc, node) = question(command_line());
        let mut branch = BranchPoint::attach(&doc, node).unwrap();
        branch.type_value("Look").unwrap();
        assert_eq!(branch.submit().unwrap(), "Look");
        assert_eq!(branch.state(), BranchState::Submitted);
        assert!(branch.submit().is_err());

        branch.reopen();
        branch.begin_transition();
        assert!(branch.input().readonly);
        assert!(branch.type_value("other").is_err());
        branch.settle();
        assert_eq!(branch.state(), BranchState::Readonly);
    }

    #[test]
    fn form_without_target_only_takes_choices() {
        let (doc, node) = question(FormAttrs {
            label: Some("Choose:".to_string()),
            ..FormAttrs::default()
        });
        let mut branch = BranchPoint::attach(&doc, node).unwrap();
        assert!(!branch.accepts_typing());
        assert!(matches!(branch.submit(), Err(BranchError::NoTarget(_))));
        branch.set_value("North").unwrap();
        assert_eq!(branch.value(), "north");
        assert!(branch.candidates("x").is_empty());
    }

    #[test]
    fn answered_question_stays_locked() {
        let (doc, node) = question(command_line());
        let mut branch = BranchPoint::attach(&doc, node).unwrap();
        branch.type_value("look").unwrap();
        branch.submit().unwrap();
        branch.clear();
        assert_eq!(branch.state(), BranchState::Editable);
        assert!(branch.is_open());

        branch.type_value("look").unwrap();
        branch.submit().unwrap();
        branch.finish();
        assert!(branch.set_value("listen").is_err());
        assert_eq!(branch.value(), "look");

        branch.clear();
        assert_eq!(branch.value(), "");
        assert_eq!(branch.state(), BranchState::Readonly);
        assert!(branch.input().readonly);
        assert!(branch.type_value("listen").is_err());
    }
}
