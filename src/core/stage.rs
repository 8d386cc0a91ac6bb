/// The stage: one document, its terminals, questions and choice groups.
///
/// Wires the reveal scheduler to the branching layer. The host drives it by
/// calling `tick` from its animation clock, forwards user input through
/// `answer`/`click`, and drains `HostEffect`s to scroll, focus and navigate.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::core::branch::{BranchError, BranchPoint, BranchState};
use crate::core::config::{ConfigError, StageConfig, RESET_PARAMETER};
use crate::core::group::{self, ChoiceGroup, GlobalCommand, GroupError};
use crate::core::registry::{self, FragmentRegistry};
use crate::core::signal::{Lifetime, Reaction, Signal, SignalEvent};
use crate::core::store::{MemoryStore, Store, StoreError};
use crate::core::terminal::{Overrides, Playback, PlaybackState, Step, Terminal, TerminalError};
use crate::core::timeline::Timeline;
use crate::schema::document::{Document, DocumentError};
use crate::schema::markup::{CursorMode, Markup};
use crate::schema::node::{ElementKind, NodeId};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
    #[error("terminal error: {0}")]
    Terminal(#[from] TerminalError),
    #[error("branch error: {0}")]
    Branch(#[from] BranchError),
    #[error("group error: {0}")]
    Group(#[from] GroupError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid location: {0}")]
    Location(#[from] url::ParseError),
    #[error("no terminal attached at {0:?}")]
    UnknownTerminal(NodeId),
    #[error("no question attached at {0:?}")]
    UnknownForm(NodeId),
    #[error("no choice group attached at {0:?}")]
    UnknownGroup(NodeId),
}

/// Something only the host can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostEffect {
    ScrollIntoView(NodeId),
    Focus(NodeId),
    Blur(NodeId),
    Navigate(String),
    /// Replace the current page with this location.
    Reload(String),
    /// Keep the terminal's pre-reveal height reserved.
    LockHeight(NodeId),
}

/// Outcome of submitting a typed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing matched; the question stays editable.
    Unresolved,
    /// The answer's fragment was cloned at `clone` and is playing.
    Advanced {
        fragment: String,
        clone: NodeId,
        next: Option<NodeId>,
    },
    /// A global fragment played in place; the question is asked again.
    Detour { fragment: String, clone: NodeId },
}

/// Outcome of a click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The click did not land on a summary.
    Ignored,
    /// A disclosure outside any choice group was toggled.
    Toggled { details: NodeId, open: bool },
    /// The group already has its answer.
    Inert,
    Global { fragment: String, clone: NodeId },
    Selected {
        terminal: Option<NodeId>,
        next: Option<NodeId>,
    },
}

pub struct Stage {
    document: Document,
    config: StageConfig,
    terminals: FxHashMap<NodeId, Terminal>,
    forms: FxHashMap<NodeId, BranchPoint>,
    groups: FxHashMap<NodeId, ChoiceGroup>,
    registry: FragmentRegistry,
    commands: Vec<GlobalCommand>,
    store: Box<dyn Store>,
    timeline: Timeline<Step>,
    rng: StdRng,
    signals: Vec<SignalEvent>,
    effects: Vec<HostEffect>,
    location: Option<Url>,
}

pub struct StageBuilder {
    config: StageConfig,
    document: Option<Document>,
    store: Option<Box<dyn Store>>,
}

impl Stage {
    pub fn builder() -> StageBuilder {
        StageBuilder {
            config: StageConfig::default(),
            document: None,
            store: None,
        }
    }

    // Accessors

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn terminal(&self, node: NodeId) -> Option<&Terminal> {
        self.terminals.get(&node)
    }

    pub fn form(&self, node: NodeId) -> Option<&BranchPoint> {
        self.forms.get(&node)
    }

    pub fn group(&self, node: NodeId) -> Option<&ChoiceGroup> {
        self.groups.get(&node)
    }

    pub fn registry(&self) -> &FragmentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    /// Look up an element by id, attached fragments first.
    pub fn find(&self, id: &str) -> Option<NodeId> {
        self.registry
            .get(id)
            .or_else(|| self.document.find_by_id(id))
    }

    /// Attached terminals in document order.
    pub fn terminals(&self) -> Vec<NodeId> {
        self.in_document_order(|stage, node| stage.terminals.contains_key(&node))
    }

    /// Attached questions in document order.
    pub fn forms(&self) -> Vec<NodeId> {
        self.in_document_order(|stage, node| stage.forms.contains_key(&node))
    }

    pub fn groups(&self) -> Vec<NodeId> {
        self.in_document_order(|stage, node| stage.groups.contains_key(&node))
    }

    fn in_document_order<F>(&self, keep: F) -> Vec<NodeId>
    where
        F: Fn(&Stage, NodeId) -> bool,
    {
        self.document
            .document_order()
            .into_iter()
            .filter(|node| keep(self, *node))
            .collect()
    }

    /// Whether a terminal still offers its play/skip controls.
    pub fn controls_visible(&self, node: NodeId) -> bool {
        self.terminals
            .get(&node)
            .is_some_and(Terminal::controls_visible)
    }

    /// No reveal step is pending.
    pub fn is_idle(&self) -> bool {
        self.timeline.is_idle()
    }

    pub fn now(&self) -> u64 {
        self.timeline.now()
    }

    pub fn next_due(&self) -> Option<u64> {
        self.timeline.next_due()
    }

    pub fn drain_signals(&mut self) -> Vec<SignalEvent> {
        std::mem::take(&mut self.signals)
    }

    pub fn drain_effects(&mut self) -> Vec<HostEffect> {
        std::mem::take(&mut self.effects)
    }

    // Attachment

    /// Attach everything beneath `root` that is not attached yet: terminals
    /// first, then questions, then choice groups, each in document order.
    /// A terminal inside another terminal is content of the outer one.
    pub fn attach(&mut self, root: NodeId) -> Result<(), StageError> {
        self.attach_subtree(root, true)
    }

    /// Instantiate `markup` under `parent` (before `before` when given) and
    /// attach it.
    pub fn insert(
        &mut self,
        markup: &Markup,
        parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<NodeId, StageError> {
        let node = self.document.insert(markup, parent, before)?;
        self.attach(node)?;
        Ok(node)
    }

    fn attach_subtree(&mut self, root: NodeId, autoplay: bool) -> Result<(), StageError> {
        let nodes = self.document.descendants(root);

        let mut claimed: FxHashSet<NodeId> = self.terminals.keys().copied().collect();
        let mut attached = Vec::new();
        for &node in &nodes {
            let is_terminal = self.document.element(node).is_some_and(|e| e.is_terminal());
            if !is_terminal || claimed.contains(&node) || self.inside_terminal(node, &claimed) {
                continue;
            }
            self.attach_terminal(node)?;
            claimed.insert(node);
            attached.push(node);
        }

        for &node in &nodes {
            let is_form = matches!(
                self.document.element(node).map(|e| &e.kind),
                Some(ElementKind::Form(_))
            );
            if is_form && !self.forms.contains_key(&node) {
                let branch = BranchPoint::attach(&self.document, node)?;
                if branch.autofocus() {
                    self.effects.push(HostEffect::Focus(node));
                }
                log::debug!("attached question {:?} '{}'", node, branch.label());
                self.forms.insert(node, branch);
            }
        }

        for &node in &nodes {
            let is_group = matches!(
                self.document.element(node).map(|e| &e.kind),
                Some(ElementKind::Group(_))
            );
            if is_group && !self.groups.contains_key(&node) {
                let group = ChoiceGroup::attach(&mut self.document, node, &self.commands)?;
                log::debug!(
                    "attached choice group '{}' with {} global entries",
                    group.id(),
                    group.entries().len()
                );
                self.groups.insert(node, group);
            }
        }

        if autoplay && !self.config.visibility_sensing {
            for node in attached {
                self.autoplay(node)?;
            }
        }
        Ok(())
    }

    fn inside_terminal(&self, node: NodeId, claimed: &FxHashSet<NodeId>) -> bool {
        let mut current = self.document.parent(node);
        while let Some(id) = current {
            if claimed.contains(&id) {
                return true;
            }
            current = self.document.parent(id);
        }
        false
    }

    fn attach_terminal(&mut self, node: NodeId) -> Result<(), StageError> {
        let mut terminal = Terminal::attach(&mut self.document, node)?;
        let attrs = terminal.attrs().clone();

        if attrs.cursor == CursorMode::On {
            terminal.observers.subscribe(
                Signal::Start,
                Reaction::ShowCursor(true),
                Lifetime::Persistent,
            );
            terminal.observers.subscribe(
                Signal::End,
                Reaction::ShowCursor(false),
                Lifetime::Persistent,
            );
        }
        if let Some(href) = &attrs.href {
            terminal.observers.subscribe(
                Signal::End,
                Reaction::Navigate(href.clone()),
                Lifetime::Persistent,
            );
        }
        if attrs.dimensions {
            self.effects.push(HostEffect::LockHeight(node));
        }
        if let Some(id) = self.document.element(node).and_then(|e| e.id.clone()) {
            self.registry.register(&id, node);
        }

        log::debug!(
            "attached terminal {:?} ({} characters)",
            node,
            terminal.total_chars()
        );
        self.terminals.insert(node, terminal);
        Ok(())
    }

    fn autoplay(&mut self, node: NodeId) -> Result<(), StageError> {
        let ready = self
            .terminals
            .get(&node)
            .is_some_and(|t| t.attrs().autoplay && t.state() == PlaybackState::Idle);
        if ready {
            self.play(node)?;
        }
        Ok(())
    }

    /// Remove `node` and its subtree from the document, dropping everything
    /// attached inside it.
    pub fn detach(&mut self, node: NodeId) {
        let removed = self.document.remove(node);
        self.forget(&removed);
    }

    fn forget(&mut self, removed: &[NodeId]) {
        for node in removed {
            self.terminals.remove(node);
            self.forms.remove(node);
            self.groups.remove(node);
            self.registry.unregister(*node);
        }
    }

    /// The host saw `node` enter or leave the viewport.
    pub fn set_visible(&mut self, node: NodeId, visible: bool) -> Result<(), StageError> {
        if visible {
            self.autoplay(node)?;
        }
        Ok(())
    }

    // Playback

    fn drive<F>(&mut self, node: NodeId, action: F) -> Result<(), StageError>
    where
        F: FnOnce(&mut Terminal, &mut Playback<'_>) -> Vec<Signal>,
    {
        let terminal = self
            .terminals
            .get_mut(&node)
            .ok_or(StageError::UnknownTerminal(node))?;
        let mut ctx = Playback {
            document: &mut self.document,
            timeline: &mut self.timeline,
            rng: &mut self.rng,
            config: &self.config,
        };
        let signals = action(terminal, &mut ctx);
        self.emit(node, signals);
        Ok(())
    }

    pub fn play(&mut self, node: NodeId) -> Result<(), StageError> {
        self.play_with(node, Overrides::default())
    }

    pub fn play_with(&mut self, node: NodeId, overrides: Overrides) -> Result<(), StageError> {
        self.drive(node, |terminal, ctx| terminal.play(ctx, overrides))
    }

    pub fn pause(&mut self, node: NodeId) -> Result<(), StageError> {
        let terminal = self
            .terminals
            .get_mut(&node)
            .ok_or(StageError::UnknownTerminal(node))?;
        terminal.pause();
        Ok(())
    }

    pub fn skip(&mut self, node: NodeId) -> Result<(), StageError> {
        self.drive(node, |terminal, ctx| terminal.skip(ctx))
    }

    pub fn toggle(&mut self, node: NodeId) -> Result<(), StageError> {
        self.drive(node, |terminal, ctx| terminal.toggle(ctx))
    }

    /// Put a terminal back to its authored content, re-attaching whatever
    /// lives inside it.
    pub fn reset_terminal(&mut self, node: NodeId) -> Result<(), StageError> {
        let terminal = self
            .terminals
            .get_mut(&node)
            .ok_or(StageError::UnknownTerminal(node))?;
        let removed = terminal.reset(&mut self.document)?;
        self.forget(&removed);
        log::debug!("reset terminal {:?}", node);
        self.attach_subtree(node, false)
    }

    /// Run every reveal step due at `now`. Returns how many ran.
    pub fn tick(&mut self, now: u64) -> usize {
        let due = self.timeline.take_due(now);
        let count = due.len();
        for step in due {
            let Some(terminal) = self.terminals.get_mut(&step.terminal) else {
                continue;
            };
            let mut ctx = Playback {
                document: &mut self.document,
                timeline: &mut self.timeline,
                rng: &mut self.rng,
                config: &self.config,
            };
            let signals = terminal.run_step(&mut ctx, step);
            self.emit(step.terminal, signals);
        }
        count
    }

    /// Tick every `frame_ms` (jumping over idle stretches) until nothing is
    /// scheduled. Returns the final clock.
    pub fn run_until_idle(&mut self, frame_ms: u64) -> u64 {
        let frame_ms = frame_ms.max(1);
        while let Some(due) = self.timeline.next_due() {
            let now = (self.timeline.now() + frame_ms).max(due);
            self.tick(now);
        }
        self.timeline.now()
    }

    fn emit(&mut self, terminal: NodeId, signals: Vec<Signal>) {
        for signal in signals {
            self.signals.push(SignalEvent { terminal, signal });
            let reactions = match self.terminals.get_mut(&terminal) {
                Some(t) => t.observers.fire(signal),
                None => continue,
            };
            for reaction in reactions {
                self.react(terminal, reaction);
            }
        }
    }

    fn react(&mut self, terminal: NodeId, reaction: Reaction) {
        match reaction {
            Reaction::ScrollIntoView(node) => self.effects.push(HostEffect::ScrollIntoView(node)),
            Reaction::CompleteTransition { form, open_details } => {
                self.complete_transition(form, open_details)
            }
            Reaction::SettleBranch(form) => {
                if let Some(branch) = self.forms.get_mut(&form) {
                    branch.settle();
                }
            }
            Reaction::ShowCursor(visible) => {
                if let Some(t) = self.terminals.get_mut(&terminal) {
                    t.set_cursor_visible(visible);
                }
            }
            Reaction::Navigate(href) => {
                log::info!("terminal {:?} finished; navigating to {}", terminal, href);
                self.effects.push(HostEffect::Navigate(href));
            }
        }
    }

    fn complete_transition(&mut self, form: NodeId, open_details: bool) {
        if open_details {
            if let Some(details) = self.document.closest_details(form) {
                set_open(&mut self.document, details, true);
            }
        }
        if let Some(branch) = self.forms.get_mut(&form) {
            branch.active = false;
            if branch.accepts_typing() {
                self.effects.push(HostEffect::Focus(form));
            }
        }
    }

    /// Play `terminal` on behalf of `form`: scroll `scroll_to` on every frame
    /// and hand control to `form` once it ends. Replays (not user initiated)
    /// skip straight to the end.
    fn transition_to(
        &mut self,
        form: Option<NodeId>,
        terminal: NodeId,
        scroll_to: NodeId,
        from_user: bool,
    ) -> Result<(), StageError> {
        let global = self
            .terminals
            .get(&terminal)
            .ok_or(StageError::UnknownTerminal(terminal))?
            .is_global();

        let mut on_end = Vec::new();
        if let Some(form) = form {
            if let Some(branch) = self.forms.get_mut(&form) {
                branch.active = true;
            }
            on_end.push(Reaction::CompleteTransition {
                form,
                open_details: !global,
            });
        }
        self.follow(terminal, Reaction::ScrollIntoView(scroll_to), on_end);

        if from_user {
            self.play(terminal)
        } else {
            self.pause(terminal)?;
            self.skip(terminal)
        }
    }

    /// Subscribe transition reactions; a terminal that already finished
    /// will never end again, so its end reactions run now.
    fn follow(&mut self, terminal: NodeId, on_frame: Reaction, on_end: Vec<Reaction>) {
        let Some(t) = self.terminals.get_mut(&terminal) else {
            return;
        };
        if t.state() == PlaybackState::Finished {
            for reaction in on_end {
                self.react(terminal, reaction);
            }
            return;
        }
        t.observers.on_reveal(on_frame);
        for reaction in on_end {
            t.observers.on_end(reaction);
        }
    }

    /// First live question after `node` in document order.
    pub fn next_form(&self, node: NodeId) -> Option<NodeId> {
        self.document
            .document_order()
            .into_iter()
            .skip_while(|id| *id != node)
            .skip(1)
            .find(|id| {
                self.forms
                    .get(id)
                    .is_some_and(|branch| branch.state() != BranchState::Superseded)
            })
    }

    // Questions

    pub fn type_input(&mut self, form: NodeId, value: &str) -> Result<(), StageError> {
        let branch = self
            .forms
            .get_mut(&form)
            .ok_or(StageError::UnknownForm(form))?;
        branch.type_value(value)?;
        Ok(())
    }

    /// Type `value` and submit it.
    pub fn answer(&mut self, form: NodeId, value: &str) -> Result<Resolution, StageError> {
        self.type_input(form, value)?;
        self.submit(form)
    }

    /// Resolve the current answer of `form` and play where it leads.
    pub fn submit(&mut self, form: NodeId) -> Result<Resolution, StageError> {
        let branch = self
            .forms
            .get_mut(&form)
            .ok_or(StageError::UnknownForm(form))?;
        let raw = branch.submit()?;
        let Some((fragment, target)) = branch.resolve(&raw, &self.registry) else {
            branch.reopen();
            log::debug!("answer '{}' to {:?} matched nothing", raw, form);
            return Ok(Resolution::Unresolved);
        };

        let terminal = self
            .terminals
            .get(&target)
            .ok_or(StageError::UnknownTerminal(target))?;
        let global = terminal.is_global();
        let original = terminal.original().clone();
        log::info!("answer '{}' to {:?} resolved to '{}'", raw, form, fragment);

        if global {
            let clone = self.detour(form, &raw, &registry::global_copy(&original))?;
            return Ok(Resolution::Detour { fragment, clone });
        }

        let next = self.next_form(form);
        let copy = registry::detached_copy(&original);
        let clone = match next {
            Some(next) => self.insert_before(&copy, next)?,
            None => self.insert_after(&copy, form)?,
        };
        self.attach_subtree(clone, false)?;

        if let Some(branch) = self.forms.get_mut(&form) {
            branch.begin_transition();
        }
        // A typed answer naming a choice settles that choice's group too.
        let choice_group = self
            .document
            .closest_details(target)
            .and_then(|details| self.enclosing_group(details));
        if let Some(group) = choice_group {
            self.persist(group, target)?;
            if let Some(group) = self.groups.get_mut(&group) {
                group.select();
            }
        }
        self.effects.push(HostEffect::Blur(form));
        let t = self
            .terminals
            .get_mut(&clone)
            .ok_or(StageError::UnknownTerminal(clone))?;
        t.observers.on_end(Reaction::SettleBranch(form));
        match next {
            Some(next) => self.transition_to(Some(next), clone, next, true)?,
            None => self.transition_to(None, clone, clone, true)?,
        }
        Ok(Resolution::Advanced {
            fragment,
            clone,
            next,
        })
    }

    /// Play a global fragment in front of `form`, keeping a read-only copy
    /// of the interrupted answer above it, and ask `form` again.
    fn detour(&mut self, form: NodeId, answer: &str, copy: &Markup) -> Result<NodeId, StageError> {
        self.supersede(form, answer)?;
        let clone = self.insert_before(copy, form)?;
        self.attach_subtree(clone, false)?;
        self.transition_to(Some(form), clone, form, true)?;
        Ok(clone)
    }

    /// Insert a read-only history copy of `form` holding `answer` before it
    /// and clear the live question.
    fn supersede(&mut self, form: NodeId, answer: &str) -> Result<NodeId, StageError> {
        let mut snapshot = self
            .document
            .snapshot(form)
            .ok_or(DocumentError::MissingNode(form))?;
        if let Markup::Form { id, attrs, .. } = &mut snapshot {
            *id = None;
            attrs.autofocus = false;
        }
        let history = self.insert_before(&snapshot, form)?;
        let mut copy = BranchPoint::attach(&self.document, history)?;
        let typed = self
            .forms
            .get(&form)
            .is_some_and(BranchPoint::accepts_typing);
        if typed {
            copy.supersede(answer);
        } else {
            copy.supersede("");
        }
        self.forms.insert(history, copy);
        self.effects.push(HostEffect::Blur(history));

        if let Some(branch) = self.forms.get_mut(&form) {
            branch.clear();
        }
        Ok(history)
    }

    fn insert_before(&mut self, markup: &Markup, sibling: NodeId) -> Result<NodeId, StageError> {
        let parent = self
            .document
            .parent(sibling)
            .ok_or(DocumentError::MissingNode(sibling))?;
        Ok(self.document.insert(markup, parent, Some(sibling))?)
    }

    fn insert_after(&mut self, markup: &Markup, sibling: NodeId) -> Result<NodeId, StageError> {
        let parent = self
            .document
            .parent(sibling)
            .ok_or(DocumentError::MissingNode(sibling))?;
        let before = self.document.next_sibling(sibling);
        Ok(self.document.insert(markup, parent, before)?)
    }

    // Choice groups

    /// A click landing on `node`. Only clicks inside a summary do anything.
    pub fn click(&mut self, node: NodeId) -> Result<Activation, StageError> {
        let summary = self.document.closest(node, |n| {
            n.element().is_some_and(|e| e.kind == ElementKind::Summary)
        });
        let Some(summary) = summary else {
            return Ok(Activation::Ignored);
        };
        match self.enclosing_group(summary) {
            Some(group) => self.activate(group, summary, true),
            None => {
                let Some(details) = self.document.parent(summary) else {
                    return Ok(Activation::Ignored);
                };
                let open = !is_open(&self.document, details);
                if !set_open(&mut self.document, details, open) {
                    return Ok(Activation::Ignored);
                }
                Ok(Activation::Toggled { details, open })
            }
        }
    }

    /// The attached choice group containing `node`.
    fn enclosing_group(&self, node: NodeId) -> Option<NodeId> {
        self.document
            .closest(node, |n| {
                matches!(n.element().map(|e| &e.kind), Some(ElementKind::Group(_)))
            })
            .filter(|group| self.groups.contains_key(group))
    }

    /// Choose the entry whose summary is `summary` in `group`.
    pub fn activate(
        &mut self,
        group: NodeId,
        summary: NodeId,
        from_user: bool,
    ) -> Result<Activation, StageError> {
        if !self.groups.contains_key(&group) {
            return Err(StageError::UnknownGroup(group));
        }
        let Some(details) = self.document.parent(summary) else {
            return Ok(Activation::Ignored);
        };
        let global_command = match self.document.element(details).map(|e| &e.kind) {
            Some(ElementKind::Details { global_command, .. }) => global_command.clone(),
            _ => return Ok(Activation::Ignored),
        };
        let label = self.document.text_content(summary).trim().to_string();
        let form = self
            .document
            .previous_sibling(group)
            .filter(|node| self.forms.contains_key(node));

        if let Some(command) = global_command {
            return self.activate_global(group, details, form, &command, &label, from_user);
        }

        if self.groups.get(&group).is_some_and(ChoiceGroup::is_selected) {
            return Ok(Activation::Inert);
        }
        let answered = form
            .and_then(|form| self.forms.get(&form))
            .is_some_and(|branch| !branch.is_open());
        if answered {
            return Ok(Activation::Inert);
        }

        set_open(&mut self.document, details, true);
        self.effects.push(HostEffect::ScrollIntoView(details));
        let terminal = self
            .document
            .child_element(details, |e| e.is_terminal())
            .filter(|node| self.terminals.contains_key(node));

        let next = self.next_form(form.unwrap_or(group));
        if let Some(terminal) = terminal {
            if from_user {
                self.persist(group, terminal)?;
            }
            self.transition_to(next, terminal, group, from_user)?;
        }

        if let Some(form) = form.and_then(|form| self.forms.get_mut(&form)) {
            form.set_value(&label)?;
            form.finish();
        }
        if let Some(group) = self.groups.get_mut(&group) {
            group.select();
        }
        log::debug!("choice '{}' selected (user: {})", label, from_user);
        Ok(Activation::Selected { terminal, next })
    }

    fn activate_global(
        &mut self,
        group: NodeId,
        details: NodeId,
        form: Option<NodeId>,
        command: &str,
        label: &str,
        from_user: bool,
    ) -> Result<Activation, StageError> {
        let source = self
            .registry
            .get(command)
            .and_then(|node| self.terminals.get(&node))
            .ok_or_else(|| GroupError::UnknownGlobalCommand(command.to_string()))?;
        let copy = registry::global_copy(source.original());

        let anchor = match form {
            Some(form) => {
                let current = self
                    .forms
                    .get(&form)
                    .map(|branch| branch.value().to_string())
                    .unwrap_or_default();
                let answer = if label.eq_ignore_ascii_case("invalid") {
                    current
                } else {
                    label.to_string()
                };
                self.supersede(form, &answer)?;
                form
            }
            None => group,
        };

        let clone = self.insert_before(&copy, anchor)?;
        self.attach_subtree(clone, false)?;
        self.transition_to(form, clone, group, from_user)?;
        self.effects.push(HostEffect::ScrollIntoView(details));
        log::debug!("global command '{}' played before {:?}", command, anchor);
        Ok(Activation::Global {
            fragment: command.to_string(),
            clone,
        })
    }

    // Persistence

    fn persist(&mut self, group: NodeId, terminal: NodeId) -> Result<(), StageError> {
        let Some(group) = self.groups.get(&group) else {
            return Ok(());
        };
        let Some(id) = self.document.element(terminal).and_then(|e| e.id.clone()) else {
            return Ok(());
        };
        let key = self.config.storage_key(group.id());
        self.store.set(&key, &id)?;
        log::info!("saved progress {} = {}", key, id);
        Ok(())
    }

    /// Replay the saved choice of every group without animating.
    pub fn restore(&mut self) -> Result<(), StageError> {
        for group in self.groups() {
            self.restore_group(group)?;
        }
        Ok(())
    }

    fn restore_group(&mut self, group: NodeId) -> Result<(), StageError> {
        let Some(group_id) = self.groups.get(&group).map(|g| g.id().to_string()) else {
            return Ok(());
        };
        let key = self.config.storage_key(&group_id);
        let Some(saved) = self.store.get(&key) else {
            return Ok(());
        };
        let Some(terminal) = self.registry.get(&saved) else {
            log::warn!("saved choice '{}' for group '{}' no longer exists", saved, group_id);
            return Ok(());
        };
        if self.skip_restore(terminal) {
            log::info!("not restoring '{}': restore disabled at or before it", saved);
            return Ok(());
        }
        let Some(details) = self.document.closest_details(terminal) else {
            log::warn!("saved choice '{}' is not inside a disclosure", saved);
            return Ok(());
        };
        set_open(&mut self.document, details, true);
        let Some(summary) = group::summary_of(&self.document, details) else {
            return Ok(());
        };
        log::info!("restoring group '{}' to '{}'", group_id, saved);
        self.activate(group, summary, false)?;
        Ok(())
    }

    /// Whether a terminal flagged `disable_restore` sits at or before
    /// `terminal` in document order.
    pub fn skip_restore(&self, terminal: NodeId) -> bool {
        for node in self.terminals() {
            if self
                .terminals
                .get(&node)
                .is_some_and(|t| t.attrs().disable_restore)
            {
                return true;
            }
            if node == terminal {
                break;
            }
        }
        false
    }

    /// Honor the reset parameter of the location: forget all saved progress
    /// and ask the host to reload without it.
    pub fn reset_all(&mut self) -> Result<bool, StageError> {
        let Some(location) = &self.location else {
            return Ok(false);
        };
        if !location.query_pairs().any(|(key, _)| key == RESET_PARAMETER) {
            return Ok(false);
        }

        let kept: Vec<(String, String)> = location
            .query_pairs()
            .filter(|(key, _)| *key != RESET_PARAMETER)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        let mut stripped = location.clone();
        if kept.is_empty() {
            stripped.set_query(None);
        } else {
            stripped.query_pairs_mut().clear().extend_pairs(kept);
        }

        let cleared = self.store.clear_prefix(&self.config.storage_prefix)?;
        log::info!("reset requested: cleared {} saved choices", cleared);
        self.effects.push(HostEffect::Reload(stripped.to_string()));
        self.location = Some(stripped);
        Ok(true)
    }
}

impl StageBuilder {
    pub fn config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn reduced_motion(mut self, reduced: bool) -> Self {
        self.config.reduced_motion = reduced;
        self
    }

    pub fn visibility_sensing(mut self, sensing: bool) -> Self {
        self.config.visibility_sensing = sensing;
        self
    }

    pub fn location(mut self, location: &str) -> Self {
        self.config.location = Some(location.to_string());
        self
    }

    pub fn store<S: Store + 'static>(mut self, store: S) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn boxed_store(mut self, store: Box<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    /// Attach the whole document, honor a reset request, replay saved
    /// choices and start autoplay terminals.
    pub fn build(self) -> Result<Stage, StageError> {
        self.config.validate()?;
        let location = self
            .config
            .location
            .as_deref()
            .map(Url::parse)
            .transpose()?;
        let document = self.document.unwrap_or_default();
        let commands = group::global_commands(&document)?;

        let mut stage = Stage {
            rng: StdRng::seed_from_u64(self.config.seed),
            document,
            config: self.config,
            terminals: FxHashMap::default(),
            forms: FxHashMap::default(),
            groups: FxHashMap::default(),
            registry: FragmentRegistry::new(),
            commands,
            store: self.store.unwrap_or_else(|| Box::new(MemoryStore::new())),
            timeline: Timeline::new(),
            signals: Vec::new(),
            effects: Vec::new(),
            location,
        };

        let root = stage.document.root();
        stage.attach_subtree(root, false)?;
        stage.reset_all()?;
        stage.restore()?;
        if !stage.config.visibility_sensing {
            for node in stage.terminals() {
                stage.autoplay(node)?;
            }
        }
        log::info!(
            "stage ready: {} terminals, {} questions, {} groups",
            stage.terminals.len(),
            stage.forms.len(),
            stage.groups.len()
        );
        Ok(stage)
    }
}

fn is_open(document: &Document, details: NodeId) -> bool {
    matches!(
        document.element(details).map(|e| &e.kind),
        Some(ElementKind::Details { open: true, .. })
    )
}

/// Returns false when `details` is not a disclosure.
fn set_open(document: &mut Document, details: NodeId, value: bool) -> bool {
    match document.element_mut(details).map(|e| &mut e.kind) {
        Some(ElementKind::Details { open, .. }) => {
            *open = value;
            true
        }
        _ => false,
    }
}
