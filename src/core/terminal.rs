/// Reveal scheduler — drains a terminal's units in randomized chunks.
///
/// Driven cooperatively: `play` schedules a `Step` on the timeline, each
/// step applies one chunk and schedules the next. `pause` only flips a flag;
/// steps already queued still arrive and do nothing.
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use crate::core::config::StageConfig;
use crate::core::cursor::CursorTracker;
use crate::core::serializer::{self, RevealUnit, UnitKind};
use crate::core::signal::{Observers, Signal};
use crate::core::timeline::Timeline;
use crate::schema::document::{Document, DocumentError};
use crate::schema::markup::{CursorMode, Markup, TerminalAttrs};
use crate::schema::node::NodeId;

/// Speeds below this are clamped; zero would mean an infinite delay.
const MIN_SPEED: f32 = 0.1;

/// Converts the 0–10 speed scale into characters per millisecond.
const SPEED_SCALE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("node {0:?} is not a terminal")]
    NotATerminal(NodeId),
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Serialized, never played.
    Idle,
    Playing,
    Paused,
    /// Queue exhausted and `end` delivered. Only `reset` leaves this state.
    Finished,
}

/// Per-play overrides of the chunk size and inter-frame delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overrides {
    pub chunk_size: Option<usize>,
    pub delay_ms: Option<u64>,
    /// Apply the step even while paused.
    pub force: bool,
}

/// A scheduled reveal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub terminal: NodeId,
    /// Play run the step belongs to; steps from older runs are ignored.
    pub generation: u64,
    pub overrides: Overrides,
}

/// Mutable surroundings a terminal needs while playing.
pub struct Playback<'a> {
    pub document: &'a mut Document,
    pub timeline: &'a mut Timeline<Step>,
    pub rng: &'a mut StdRng,
    pub config: &'a StageConfig,
}

/// One reveal segment and its playback state.
#[derive(Debug, Clone)]
pub struct Terminal {
    root: NodeId,
    attrs: TerminalAttrs,
    /// Authored content captured before serialization emptied it.
    original: Markup,
    units: Vec<RevealUnit>,
    total_chars: usize,
    state: PlaybackState,
    paused: bool,
    started: bool,
    generation: u64,
    cursor: CursorTracker,
    cursor_visible: bool,
    controls: bool,
    pub observers: Observers,
}

impl Terminal {
    /// Snapshot and serialize the terminal rooted at `root`.
    pub fn attach(document: &mut Document, root: NodeId) -> Result<Terminal, TerminalError> {
        let attrs = document
            .element(root)
            .and_then(|element| element.terminal_attrs())
            .cloned()
            .ok_or(TerminalError::NotATerminal(root))?;
        let original = document
            .snapshot(root)
            .ok_or(DocumentError::MissingNode(root))?;

        let mut terminal = Terminal {
            root,
            total_chars: original.char_count(),
            original,
            units: Vec::new(),
            state: PlaybackState::Idle,
            paused: true,
            started: false,
            generation: 0,
            cursor: CursorTracker::new(),
            cursor_visible: false,
            controls: attrs.buttons,
            attrs,
            observers: Observers::new(),
        };
        terminal.serialize(document);
        Ok(terminal)
    }

    fn serialize(&mut self, document: &mut Document) {
        let manual = self.attrs.cursor == CursorMode::Manual;
        self.units = serializer::serialize(document, self.root, manual);
        if manual {
            self.cursor_visible = true;
            self.cursor.mark_active(document, self.root, self.root);
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn attrs(&self) -> &TerminalAttrs {
        &self.attrs
    }

    pub fn original(&self) -> &Markup {
        &self.original
    }

    pub fn units(&self) -> &[RevealUnit] {
        &self.units
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_global(&self) -> bool {
        self.attrs.global
    }

    /// Code points still queued.
    pub fn remaining(&self) -> usize {
        serializer::remaining(&self.units)
    }

    pub fn has_queue(&self) -> bool {
        self.units.iter().any(|unit| unit.remaining() > 0)
    }

    /// Code points of the authored content; the chunk size of a skip.
    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor_visible = visible;
    }

    pub fn cursor_position(&self, document: &Document) -> Option<NodeId> {
        self.cursor.position(document, self.root)
    }

    /// Play/skip controls are offered until the first play.
    pub fn controls_visible(&self) -> bool {
        self.controls
    }

    /// Start or resume playback. Returns the signals emitted synchronously.
    pub fn play(&mut self, ctx: &mut Playback<'_>, overrides: Overrides) -> Vec<Signal> {
        if self.state == PlaybackState::Finished {
            return Vec::new();
        }

        let mut overrides = overrides;
        if ctx.config.reduced_motion {
            overrides.chunk_size = Some(self.full_chunk());
            overrides.delay_ms = Some(0);
        }

        self.paused = false;
        self.controls = false;
        self.generation += 1;

        let mut signals = Vec::new();
        if self.has_queue() {
            self.state = PlaybackState::Playing;
            if !self.started {
                self.started = true;
                signals.push(Signal::Start);
            }
        }

        log::debug!(
            "terminal {:?} playing (generation {}, {} queued)",
            self.root,
            self.generation,
            self.remaining()
        );
        ctx.timeline.next_tick(Step {
            terminal: self.root,
            generation: self.generation,
            overrides,
        });
        signals
    }

    /// Suspend playback. Already committed characters stay revealed.
    pub fn pause(&mut self) {
        self.paused = true;
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Reveal everything in one chunk, still going through `frame`/`end`.
    pub fn skip(&mut self, ctx: &mut Playback<'_>) -> Vec<Signal> {
        let overrides = Overrides {
            chunk_size: Some(self.full_chunk()),
            delay_ms: Some(0),
            force: false,
        };
        self.play(ctx, overrides)
    }

    pub fn toggle(&mut self, ctx: &mut Playback<'_>) -> Vec<Signal> {
        if self.paused {
            self.play(ctx, Overrides::default())
        } else {
            self.pause();
            Vec::new()
        }
    }

    fn full_chunk(&self) -> usize {
        self.total_chars.max(self.remaining()).max(1)
    }

    /// Run a scheduled step. Steps from an earlier play run are dropped.
    pub fn run_step(&mut self, ctx: &mut Playback<'_>, step: Step) -> Vec<Signal> {
        if step.generation != self.generation {
            return Vec::new();
        }
        self.show_more(ctx, step.overrides, true)
    }

    /// Apply one chunk. With `continue_playing` the next step is scheduled.
    pub fn show_more(
        &mut self,
        ctx: &mut Playback<'_>,
        overrides: Overrides,
        continue_playing: bool,
    ) -> Vec<Signal> {
        if self.paused && !overrides.force {
            return Vec::new();
        }
        if self.state == PlaybackState::Finished {
            return Vec::new();
        }

        if !self.has_queue() {
            self.pause();
            self.state = PlaybackState::Finished;
            self.started = false;
            log::debug!("terminal {:?} finished", self.root);
            return vec![Signal::Frame, Signal::End];
        }

        let chunk_size = overrides
            .chunk_size
            .unwrap_or_else(|| draw_chunk(ctx.rng, ctx.config))
            .max(1);
        self.add_characters(ctx.document, chunk_size);

        if continue_playing {
            let delay = overrides
                .delay_ms
                .unwrap_or_else(|| self.delay_for(chunk_size, ctx.config));
            let next = Step {
                terminal: self.root,
                generation: self.generation,
                overrides,
            };
            if delay > ctx.config.frame_threshold_ms {
                ctx.timeline.after(delay, next);
            } else {
                ctx.timeline.next_tick(next);
            }
        }

        vec![Signal::Frame]
    }

    /// Milliseconds to wait after revealing `chunk_size` characters.
    pub fn delay_for(&self, chunk_size: usize, config: &StageConfig) -> u64 {
        let speed = self.attrs.speed.unwrap_or(config.speed).max(MIN_SPEED);
        (chunk_size as f32 / (speed * SPEED_SCALE)).round() as u64
    }

    /// Pop up to `count` code points across the units in order. The walk
    /// stops at the first unit that still has text once the budget is spent;
    /// that unit takes the cursor but receives nothing.
    fn add_characters(&mut self, document: &mut Document, count: usize) {
        let root = self.root;
        let mut budget = count;
        let mut cursor_target = None;

        for unit in &mut self.units {
            let Some(node) = document.resolve(root, &unit.path) else {
                continue;
            };
            match &mut unit.kind {
                UnitKind::Placeholder => {
                    reveal_subtree(document, node);
                    clear_empty(document, root, node);
                }
                UnitKind::Text { queue } => {
                    if queue.is_empty() {
                        continue;
                    }
                    let take = budget.min(queue.len());
                    if take > 0 {
                        let chunk: String = queue.drain(..take).collect();
                        budget -= take;
                        document.push_text(node, &chunk);
                        clear_empty(document, root, node);
                    }
                    if !queue.is_empty() {
                        cursor_target = document.parent(node);
                        if budget == 0 {
                            break;
                        }
                    }
                }
            }
        }

        if let Some(target) = cursor_target {
            self.cursor.mark_active(document, root, target);
        }
    }

    /// Rebuild the live content from the authored snapshot and serialize it
    /// again. The caller is responsible for re-attaching anything that lived
    /// inside the old content.
    pub fn reset(&mut self, document: &mut Document) -> Result<Vec<NodeId>, TerminalError> {
        self.cursor.clear(document, self.root);
        let mut removed = Vec::new();
        for child in document.children(self.root).to_vec() {
            removed.extend(document.remove(child));
        }
        for child in self.original.children() {
            document.append(child, self.root)?;
        }

        self.state = PlaybackState::Idle;
        self.paused = true;
        self.started = false;
        self.generation += 1;
        self.cursor_visible = false;
        self.controls = self.attrs.buttons;
        self.serialize(document);
        Ok(removed)
    }
}

fn draw_chunk(rng: &mut StdRng, config: &StageConfig) -> usize {
    let range = config.chunk_range();
    rng.gen_range(range.min..=range.max.max(range.min))
}

/// Clear the empty flag from `node` up to (not including) `root`.
fn clear_empty(document: &mut Document, root: NodeId, node: NodeId) {
    let mut current = Some(node);
    while let Some(id) = current {
        if id == root {
            break;
        }
        if let Some(element) = document.element_mut(id) {
            element.empty = false;
        }
        current = document.parent(id);
    }
}

fn reveal_subtree(document: &mut Document, node: NodeId) {
    for id in document.descendants(node) {
        if let Some(element) = document.element_mut(id) {
            element.empty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    struct Harness {
        document: Document,
        timeline: Timeline<Step>,
        rng: StdRng,
        config: StageConfig,
        terminal: Terminal,
    }

    impl Harness {
        fn new(children: Vec<Markup>, attrs: TerminalAttrs, config: StageConfig) -> Self {
            let mut document = Document::from_markup(&[Markup::terminal("t", attrs, children)]);
            let root = document.find_by_id("t").unwrap();
            let terminal = Terminal::attach(&mut document, root).unwrap();
            Self {
                document,
                timeline: Timeline::new(),
                rng: StdRng::seed_from_u64(7),
                config,
                terminal,
            }
        }

        fn play(&mut self, overrides: Overrides) -> Vec<Signal> {
            let mut ctx = Playback {
                document: &mut self.document,
                timeline: &mut self.timeline,
                rng: &mut self.rng,
                config: &self.config,
            };
            self.terminal.play(&mut ctx, overrides)
        }

        fn skip(&mut self) -> Vec<Signal> {
            let mut ctx = Playback {
                document: &mut self.document,
                timeline: &mut self.timeline,
                rng: &mut self.rng,
                config: &self.config,
            };
            self.terminal.skip(&mut ctx)
        }

        /// Run every step due at `now`.
        fn tick(&mut self, now: u64) -> Vec<Signal> {
            let mut signals = Vec::new();
            for step in self.timeline.take_due(now) {
                let mut ctx = Playback {
                    document: &mut self.document,
                    timeline: &mut self.timeline,
                    rng: &mut self.rng,
                    config: &self.config,
                };
                signals.extend(self.terminal.run_step(&mut ctx, step));
            }
            signals
        }

        fn run(&mut self) -> Vec<Signal> {
            let mut signals = Vec::new();
            let mut now = 0;
            while !self.timeline.is_idle() {
                now += 16;
                signals.extend(self.tick(now));
            }
            signals
        }

        fn text(&self) -> String {
            self.document.text_content(self.terminal.root())
        }
    }

    fn paragraph() -> Vec<Markup> {
        vec![
            Markup::text("The door creaks open. "),
            Markup::block("em", vec![Markup::text("Something")]),
            Markup::text(" waits."),
        ]
    }

    #[test]
    fn play_reveals_everything_in_order() {
        let mut h = Harness::new(paragraph(), TerminalAttrs::default(), StageConfig::default());
        assert_eq!(h.text(), "");
        let mut signals = h.play(Overrides::default());
        signals.extend(h.run());

        assert_eq!(h.text(), "The door creaks open. Something waits.");
        assert_eq!(h.terminal.state(), PlaybackState::Finished);
        assert_eq!(signals.first(), Some(&Signal::Start));
        assert_eq!(signals.last(), Some(&Signal::End));
        assert_eq!(signals.iter().filter(|s| **s == Signal::End).count(), 1);
        assert_eq!(signals.iter().filter(|s| **s == Signal::Start).count(), 1);
    }

    #[test]
    fn remaining_never_increases() {
        let mut h = Harness::new(paragraph(), TerminalAttrs::default(), StageConfig::default());
        h.play(Overrides::default());
        let mut last = h.terminal.remaining();
        let mut now = 0;
        let mut ended_at_zero = false;
        while !h.timeline.is_idle() {
            now += 16;
            let signals = h.tick(now);
            let remaining = h.terminal.remaining();
            assert!(remaining <= last);
            if signals.contains(&Signal::End) {
                assert_eq!(remaining, 0);
                ended_at_zero = true;
            }
            last = remaining;
        }
        assert!(ended_at_zero);
    }

    #[test]
    fn chunk_stops_at_budget() {
        let mut h = Harness::new(
            vec![Markup::text("abc"), Markup::block("p", vec![Markup::text("def")])],
            TerminalAttrs::default(),
            StageConfig::default(),
        );
        let overrides = Overrides {
            chunk_size: Some(3),
            delay_ms: Some(1000),
            force: false,
        };
        h.play(overrides);
        h.tick(0);
        assert_eq!(h.text(), "abc");

        // The next unit saw the budget run out: it holds the cursor but
        // is still hidden.
        let paragraph = h.document.children(h.terminal.root())[1];
        assert!(h.document.element(paragraph).unwrap().empty);
        assert_eq!(h.terminal.cursor_position(&h.document), Some(paragraph));

        h.tick(1000);
        assert_eq!(h.text(), "abcdef");
        assert!(!h.document.element(paragraph).unwrap().empty);
    }

    #[test]
    fn pause_keeps_queue_and_resume_continues() {
        let mut h = Harness::new(paragraph(), TerminalAttrs::default(), StageConfig::default());
        let overrides = Overrides {
            chunk_size: Some(4),
            delay_ms: Some(0),
            force: false,
        };
        h.play(overrides);
        h.tick(16);
        assert_eq!(h.text(), "The ");
        h.terminal.pause();
        assert_eq!(h.terminal.state(), PlaybackState::Paused);
        // The already scheduled step arrives and does nothing.
        assert!(h.tick(32).is_empty());
        assert_eq!(h.text(), "The ");
        assert!(h.timeline.is_idle());

        let signals = h.play(overrides);
        assert!(signals.is_empty(), "start fires once per run");
        h.run();
        assert_eq!(h.text(), "The door creaks open. Something waits.");
    }

    #[test]
    fn stale_steps_do_not_double_the_speed() {
        let mut h = Harness::new(paragraph(), TerminalAttrs::default(), StageConfig::default());
        let overrides = Overrides {
            chunk_size: Some(2),
            delay_ms: Some(0),
            force: false,
        };
        h.play(overrides);
        h.play(overrides);
        h.tick(16);
        assert_eq!(h.text(), "Th");
    }

    #[test]
    fn skip_reveals_in_one_frame() {
        let mut h = Harness::new(paragraph(), TerminalAttrs::default(), StageConfig::default());
        assert_eq!(h.skip(), vec![Signal::Start]);
        assert_eq!(h.tick(16), vec![Signal::Frame]);
        assert_eq!(h.terminal.remaining(), 0);
        assert_eq!(h.tick(32), vec![Signal::Frame, Signal::End]);
        assert!(h.timeline.is_idle());
    }

    #[test]
    fn reduced_motion_drains_in_single_chunk() {
        let config = StageConfig {
            reduced_motion: true,
            ..StageConfig::default()
        };
        let mut h = Harness::new(paragraph(), TerminalAttrs::default(), config);
        h.play(Overrides::default());
        h.tick(16);
        assert_eq!(h.terminal.remaining(), 0);
        // Zero delay: the closing step is due on the very next tick.
        assert_eq!(h.timeline.next_due(), Some(16));
    }

    #[test]
    fn delay_follows_speed() {
        let attrs = TerminalAttrs {
            speed: Some(10.0),
            ..TerminalAttrs::default()
        };
        let h = Harness::new(paragraph(), attrs, StageConfig::default());
        assert_eq!(h.terminal.delay_for(30, &StageConfig::default()), 10);

        let slow = Harness::new(paragraph(), TerminalAttrs::default(), StageConfig::default());
        assert_eq!(slow.terminal.delay_for(30, &StageConfig::default()), 50);
    }

    #[test]
    fn slow_playback_goes_through_the_timer() {
        let mut h = Harness::new(paragraph(), TerminalAttrs::default(), StageConfig::default());
        h.play(Overrides {
            chunk_size: Some(30),
            delay_ms: None,
            force: false,
        });
        h.tick(0);
        assert_eq!(h.timeline.next_due(), Some(50));
    }

    #[test]
    fn empty_terminal_ends_without_start() {
        let mut h = Harness::new(Vec::new(), TerminalAttrs::default(), StageConfig::default());
        assert!(h.play(Overrides::default()).is_empty());
        assert_eq!(h.run(), vec![Signal::Frame, Signal::End]);
        assert!(h.play(Overrides::default()).is_empty());
        assert!(h.timeline.is_idle());
    }

    #[test]
    fn reset_restores_original_text() {
        let mut h = Harness::new(paragraph(), TerminalAttrs::default(), StageConfig::default());
        let before = h.terminal.remaining();
        h.skip();
        h.run();
        assert_eq!(h.terminal.state(), PlaybackState::Finished);

        h.terminal.reset(&mut h.document).unwrap();
        assert_eq!(h.terminal.state(), PlaybackState::Idle);
        assert_eq!(h.terminal.remaining(), before);
        assert_eq!(h.text(), "");

        let signals = h.play(Overrides::default());
        assert_eq!(signals, vec![Signal::Start]);
        h.run();
        assert_eq!(h.text(), "The door creaks open. Something waits.");
    }

    #[test]
    fn manual_cursor_trims_and_starts_on_root() {
        let attrs = TerminalAttrs {
            cursor: CursorMode::Manual,
            ..TerminalAttrs::default()
        };
        let h = Harness::new(vec![Markup::text("  ready  ")], attrs, StageConfig::default());
        assert_eq!(h.terminal.remaining(), 5);
        assert!(h.terminal.cursor_visible());
        assert_eq!(h.terminal.cursor_position(&h.document), Some(h.terminal.root()));
    }

    #[test]
    fn controls_disappear_on_play() {
        let attrs = TerminalAttrs {
            buttons: true,
            ..TerminalAttrs::default()
        };
        let mut h = Harness::new(paragraph(), attrs, StageConfig::default());
        assert!(h.terminal.controls_visible());
        h.play(Overrides::default());
        assert!(!h.terminal.controls_visible());
    }
}
