/// Stage integration tests — questions, choice groups, persistence and reset.

use narrative_terminal::core::branch::{BranchError, BranchState};
use narrative_terminal::core::group::summary_of;
use narrative_terminal::core::render::render_node;
use narrative_terminal::core::stage::{Activation, HostEffect, Resolution, Stage, StageError};
use narrative_terminal::core::store::{MemoryStore, Store};
use narrative_terminal::schema::document::Document;
use narrative_terminal::schema::node::NodeId;

const ADVENTURE: &str = "tests/fixtures/adventure.ron";

fn adventure_with(store: MemoryStore) -> Stage {
    let document = Document::load_from_ron(std::path::Path::new(ADVENTURE)).unwrap();
    Stage::builder()
        .seed(42)
        .store(store)
        .document(document)
        .build()
        .unwrap()
}

fn adventure() -> Stage {
    adventure_with(MemoryStore::new())
}

fn saved(entries: &[(&str, &str)]) -> MemoryStore {
    MemoryStore::with_entries(
        entries
            .iter()
            .map(|(k, v)| (format!("narrative-terminal-group-{}", k), v.to_string())),
    )
}

/// The summary of the choice whose terminal is `fragment`.
fn choice_summary(stage: &Stage, fragment: &str) -> NodeId {
    let terminal = stage.find(fragment).unwrap();
    let details = stage.document().closest_details(terminal).unwrap();
    summary_of(stage.document(), details).unwrap()
}

fn group(stage: &Stage, id: &str) -> NodeId {
    stage.find(id).unwrap()
}

#[test]
fn fixture_attaches_every_part() {
    let stage = adventure();
    assert_eq!(stage.terminals().len(), 8);
    assert_eq!(stage.forms().len(), 2);
    assert_eq!(stage.groups().len(), 2);

    // Help is offered by the first group only; the second skips it.
    let first = stage.group(group(&stage, "first-move")).unwrap();
    assert_eq!(first.entries().len(), 1);
    let entry = first.entries()[0];
    assert_eq!(
        stage.document().element(entry).unwrap().id.as_deref(),
        Some("first-move-cmd-help")
    );
    assert_eq!(stage.document().text_content(entry), "Help");
    let second = stage.group(group(&stage, "second-move")).unwrap();
    assert!(second.entries().is_empty());
}

#[test]
fn autofocus_question_requests_focus() {
    let mut stage = adventure();
    let first = stage.forms()[0];
    assert!(stage.drain_effects().contains(&HostEffect::Focus(first)));
}

#[test]
fn alias_and_resolution_precedence() {
    let cases = [
        ("yes", "cmd-y"),
        ("Y", "cmd-y"),
        ("look", "cmd-look"),
        ("", "cmd-default"),
        ("dance", "cmd-invalid"),
    ];
    for (typed, expected) in cases {
        let mut stage = adventure();
        let form = stage.forms()[0];
        match stage.answer(form, typed).unwrap() {
            Resolution::Advanced { fragment, .. } => {
                assert_eq!(fragment, expected, "typed {:?}", typed)
            }
            other => panic!("typed {:?} gave {:?}", typed, other),
        }
    }
}

#[test]
fn answer_locks_question_until_its_fragment_ends() {
    let mut stage = adventure();
    let forms = stage.forms();
    let (first, second) = (forms[0], forms[1]);

    let clone = match stage.answer(first, "look").unwrap() {
        Resolution::Advanced { clone, next, .. } => {
            assert_eq!(next, Some(second));
            clone
        }
        other => panic!("unexpected {:?}", other),
    };
    assert!(matches!(
        stage.type_input(first, "listen"),
        Err(StageError::Branch(_))
    ));

    stage.run_until_idle(16);
    assert_eq!(stage.document().text_content(clone), "Moss glows on the walls.");
    assert_eq!(stage.form(first).unwrap().state(), BranchState::Readonly);
    assert_eq!(stage.form(first).unwrap().value(), "look");
    assert!(stage.drain_effects().contains(&HostEffect::Focus(second)));
}

#[test]
fn typed_help_is_a_detour() {
    let mut stage = adventure();
    let form = stage.forms()[0];

    let clone = match stage.answer(form, "?").unwrap() {
        Resolution::Detour { fragment, clone } => {
            assert_eq!(fragment, "cmd-help");
            clone
        }
        other => panic!("unexpected {:?}", other),
    };
    let history = stage.document().previous_sibling(clone).unwrap();
    assert_eq!(stage.document().next_sibling(clone), Some(form));
    assert_eq!(stage.form(history).unwrap().state(), BranchState::Superseded);
    assert_eq!(stage.form(history).unwrap().value(), "?");
    assert!(!stage.form(history).unwrap().autofocus());

    // The live question is asked again.
    assert_eq!(stage.form(form).unwrap().state(), BranchState::Editable);
    assert_eq!(stage.form(form).unwrap().value(), "");

    stage.run_until_idle(16);
    assert_eq!(stage.document().text_content(clone), "Try LOOK or LISTEN.");
    assert!(!stage.form(form).unwrap().active);
    assert!(stage.answer(form, "look").is_ok());
}

#[test]
fn choosing_persists_and_latches_the_group() {
    let mut stage = adventure();
    let first_move = group(&stage, "first-move");
    let form = stage.forms()[0];
    let second = stage.forms()[1];

    let look = choice_summary(&stage, "cmd-look");
    let activation = stage.click(look).unwrap();
    assert_eq!(
        activation,
        Activation::Selected {
            terminal: stage.find("cmd-look"),
            next: Some(second),
        }
    );
    assert_eq!(
        stage.store().get("narrative-terminal-group-first-move").as_deref(),
        Some("cmd-look")
    );
    assert!(stage.group(first_move).unwrap().is_selected());
    assert_eq!(stage.form(form).unwrap().value(), "look");
    assert_eq!(stage.form(form).unwrap().state(), BranchState::Readonly);

    let listen = choice_summary(&stage, "cmd-listen");
    assert_eq!(stage.click(listen).unwrap(), Activation::Inert);

    stage.run_until_idle(16);
    let rendered = render_node(&stage, first_move);
    assert!(rendered.contains("Moss glows on the walls."));
    assert!(!rendered.contains("Listen"));
}

#[test]
fn global_entry_plays_without_selecting() {
    let mut stage = adventure();
    let first_move = group(&stage, "first-move");
    let form = stage.forms()[0];
    stage.type_input(form, "xyzzy").unwrap();

    let entry = stage.group(first_move).unwrap().entries()[0];
    let summary = summary_of(stage.document(), entry).unwrap();
    let clone = match stage.click(summary).unwrap() {
        Activation::Global { fragment, clone } => {
            assert_eq!(fragment, "cmd-help");
            clone
        }
        other => panic!("unexpected {:?}", other),
    };

    assert!(!stage.group(first_move).unwrap().is_selected());
    let history = stage.document().previous_sibling(clone).unwrap();
    assert_eq!(stage.form(history).unwrap().value(), "help");
    assert_eq!(stage.form(form).unwrap().value(), "");
    assert!(stage
        .store()
        .get("narrative-terminal-group-first-move")
        .is_none());

    stage.run_until_idle(16);
    assert_eq!(stage.document().text_content(clone), "Try LOOK or LISTEN.");

    // The group still takes an ordinary choice afterwards.
    let look = choice_summary(&stage, "cmd-look");
    assert!(matches!(
        stage.click(look).unwrap(),
        Activation::Selected { .. }
    ));
}

#[test]
fn saved_choice_is_replayed_without_animation() {
    let mut stage = adventure_with(saved(&[("first-move", "cmd-listen")]));
    let first_move = group(&stage, "first-move");
    let form = stage.forms()[0];
    let listen = stage.find("cmd-listen").unwrap();

    assert!(stage.group(first_move).unwrap().is_selected());
    assert_eq!(stage.form(form).unwrap().value(), "listen");

    // Skipped: one frame reveals everything.
    let now = stage.next_due().unwrap();
    stage.tick(now);
    assert_eq!(stage.terminal(listen).unwrap().remaining(), 0);
    stage.run_until_idle(16);
    assert_eq!(stage.document().text_content(listen), "Footsteps, far away.");
}

#[test]
fn restore_is_abandoned_past_a_disabled_terminal() {
    let stage = adventure_with(saved(&[("second-move", "next-run")]));
    let second_move = group(&stage, "second-move");
    assert!(!stage.group(second_move).unwrap().is_selected());
    assert!(stage.is_idle());
    assert!(stage.skip_restore(stage.find("next-run").unwrap()));
    assert!(!stage.skip_restore(stage.find("cmd-listen").unwrap()));
}

#[test]
fn missing_saved_fragment_is_ignored() {
    let stage = adventure_with(saved(&[("first-move", "cmd-gone")]));
    let first_move = group(&stage, "first-move");
    assert!(!stage.group(first_move).unwrap().is_selected());
}

#[test]
fn reset_parameter_clears_progress_and_reloads() {
    let mut store = saved(&[("first-move", "cmd-look")]);
    store.set("theme", "dark").unwrap();
    let document = Document::load_from_ron(std::path::Path::new(ADVENTURE)).unwrap();
    let mut stage = Stage::builder()
        .store(store)
        .location("https://example.com/story?chapter=2&reset")
        .document(document)
        .build()
        .unwrap();

    assert_eq!(stage.store().keys(), vec!["theme".to_string()]);
    assert!(!stage
        .group(group(&stage, "first-move"))
        .unwrap()
        .is_selected());
    assert!(stage
        .drain_effects()
        .contains(&HostEffect::Reload("https://example.com/story?chapter=2".to_string())));
    assert_eq!(
        stage.location().map(|url| url.as_str()),
        Some("https://example.com/story?chapter=2")
    );

    // Once per navigation.
    assert!(!stage.reset_all().unwrap());
}

#[test]
fn finishing_choice_with_href_navigates() {
    let mut stage = adventure();
    let run = choice_summary(&stage, "next-run");
    stage.click(run).unwrap();
    stage.run_until_idle(16);
    assert!(stage
        .drain_effects()
        .contains(&HostEffect::Navigate("chapter-2.html".to_string())));
}

#[test]
fn missing_label_fails_the_build() {
    let document = Document::parse_ron(r#"[Form(attrs: (target: Some("cmd")))]"#).unwrap();
    let result = Stage::builder().document(document).build();
    assert!(matches!(result, Err(StageError::Branch(_))));
}

#[test]
fn global_without_disclosure_fails_the_build() {
    let document = Document::parse_ron(
        r#"[Terminal(id: Some("help"), attrs: (global: true, show_button: true))]"#,
    )
    .unwrap();
    let result = Stage::builder().document(document).build();
    assert!(matches!(result, Err(StageError::Group(_))));
}

#[test]
fn typed_answer_settles_the_choice_group() {
    let mut stage = adventure();
    let first_move = group(&stage, "first-move");
    let form = stage.forms()[0];
    let second = stage.forms()[1];

    assert!(matches!(
        stage.answer(form, "look").unwrap(),
        Resolution::Advanced { .. }
    ));
    stage.run_until_idle(16);
    assert!(stage.group(first_move).unwrap().is_selected());
    assert_eq!(
        stage.store().get("narrative-terminal-group-first-move").as_deref(),
        Some("cmd-look")
    );

    let listen = choice_summary(&stage, "cmd-listen");
    assert_eq!(stage.click(listen).unwrap(), Activation::Inert);
    assert_eq!(stage.form(form).unwrap().value(), "look");
    assert_eq!(stage.form(form).unwrap().state(), BranchState::Readonly);
    assert_eq!(
        stage.store().get("narrative-terminal-group-first-move").as_deref(),
        Some("cmd-look")
    );
    assert!(stage.is_idle());
    assert!(!stage.form(second).unwrap().active);
}

#[test]
fn answer_outside_the_group_still_locks_its_choices() {
    let mut stage = adventure();
    let form = stage.forms()[0];
    stage.answer(form, "dance").unwrap();
    stage.run_until_idle(16);

    let look = choice_summary(&stage, "cmd-look");
    assert_eq!(stage.click(look).unwrap(), Activation::Inert);
    assert_eq!(stage.form(form).unwrap().value(), "dance");
    assert!(stage
        .store()
        .get("narrative-terminal-group-first-move")
        .is_none());
}

#[test]
fn global_entry_after_a_choice_keeps_the_question_answered() {
    let mut stage = adventure();
    let first_move = group(&stage, "first-move");
    let form = stage.forms()[0];

    let look = choice_summary(&stage, "cmd-look");
    stage.click(look).unwrap();
    stage.run_until_idle(16);
    assert_eq!(stage.form(form).unwrap().state(), BranchState::Readonly);

    let entry = stage.group(first_move).unwrap().entries()[0];
    let summary = summary_of(stage.document(), entry).unwrap();
    assert!(matches!(
        stage.click(summary).unwrap(),
        Activation::Global { .. }
    ));
    assert_eq!(stage.form(form).unwrap().state(), BranchState::Readonly);
    assert!(stage.form(form).unwrap().input().readonly);
    assert_eq!(stage.form(form).unwrap().value(), "");

    assert!(matches!(
        stage.answer(form, "listen"),
        Err(StageError::Branch(BranchError::NotEditable { .. }))
    ));
    stage.run_until_idle(16);
    assert_eq!(stage.form(form).unwrap().state(), BranchState::Readonly);
}
