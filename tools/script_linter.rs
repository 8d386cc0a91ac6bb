/// Script Linter — checks a dialogue script for authoring mistakes before it ships.
///
/// Usage: script_linter <script.ron | dir>

use narrative_terminal::schema::document::Document;
use narrative_terminal::schema::node::ElementKind;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::process;

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: script_linter <script.ron | dir>");
        process::exit(0);
    }

    let path = Path::new(&args[1]);
    let mut scripts = Vec::new();
    if path.is_file() {
        scripts.push(path.to_path_buf());
    } else if path.is_dir() {
        collect_scripts(path, &mut scripts);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", args[1]);
        process::exit(1);
    }

    let mut total_errors = 0;
    let mut total_warnings = 0;

    for script in &scripts {
        println!("\n=== {} ===\n", script.display());
        let document = match Document::load_from_ron(script) {
            Ok(document) => document,
            Err(e) => {
                println!("ERROR: Failed to parse: {}", e);
                total_errors += 1;
                continue;
            }
        };

        let (errors, warnings) = lint_script(&document);
        if errors.is_empty() && warnings.is_empty() {
            println!("All checks passed!");
        }
        for warning in &warnings {
            println!("WARNING: {}", warning);
        }
        for error in &errors {
            println!("ERROR: {}", error);
        }
        total_errors += errors.len();
        total_warnings += warnings.len();
    }

    println!(
        "\nSummary: {} scripts, {} errors, {} warnings",
        scripts.len(),
        total_errors,
        total_warnings
    );

    if total_errors == 0 {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn collect_scripts(dir: &Path, scripts: &mut Vec<std::path::PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_scripts(&path, scripts);
            } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
                scripts.push(path);
            }
        }
    }
}

fn lint_script(document: &Document) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Identifiers: duplicates make lookups silently pick the first.
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();
    for node in document.query(|element| element.id.is_some()) {
        if let Some(id) = document.element(node).and_then(|e| e.id.clone()) {
            *seen.entry(id).or_insert(0) += 1;
        }
    }
    let mut duplicates: Vec<(&String, &usize)> = seen.iter().filter(|(_, n)| **n > 1).collect();
    duplicates.sort();
    for (id, count) in duplicates {
        errors.push(format!("Id '{}' is used {} times", id, count));
    }

    let terminal_ids: FxHashSet<String> = document
        .query(|element| element.is_terminal())
        .into_iter()
        .filter_map(|node| document.element(node).and_then(|e| e.id.clone()))
        .collect();

    // Questions
    for node in document.query(|element| matches!(element.kind, ElementKind::Form(_))) {
        let Some(ElementKind::Form(attrs)) = document.element(node).map(|e| &e.kind) else {
            continue;
        };
        let name = attrs.target.clone().unwrap_or_else(|| format!("{:?}", node));
        if attrs.label.as_deref().map_or(true, str::is_empty) {
            errors.push(format!("Question '{}' has no label", name));
        }
        let Some(target) = &attrs.target else {
            continue;
        };
        let prefix = format!("{}-", target);
        if !terminal_ids.iter().any(|id| id.starts_with(&prefix)) {
            errors.push(format!(
                "Question target '{}' has no fragments (expected ids like '{}look')",
                target, prefix
            ));
        }
        let invalid = attrs.invalid.as_deref().unwrap_or(target);
        if !terminal_ids.contains(&format!("{}-invalid", invalid)) {
            warnings.push(format!(
                "Question '{}' has no '{}-invalid' fragment; unmatched answers do nothing",
                target, invalid
            ));
        }
        let fallback = attrs.fallback.as_deref().unwrap_or(target);
        if !terminal_ids.contains(&format!("{}-default", fallback)) {
            warnings.push(format!(
                "Question '{}' has no '{}-default' fragment; empty answers do nothing",
                target, fallback
            ));
        }
    }

    // Global commands
    let mut globals = FxHashSet::default();
    for node in document.query(|element| {
        element
            .terminal_attrs()
            .is_some_and(|attrs| attrs.global && attrs.show_button)
    }) {
        let id = document.element(node).and_then(|e| e.id.clone());
        match &id {
            Some(id) => {
                globals.insert(id.clone());
            }
            None => warnings.push(format!(
                "Global command {:?} has no id and will not be offered",
                node
            )),
        }
        let in_disclosure = document
            .parent(node)
            .and_then(|parent| document.closest_details(parent))
            .is_some();
        if !in_disclosure {
            errors.push(format!(
                "Global command '{}' is not inside a disclosure",
                id.unwrap_or_else(|| format!("{:?}", node))
            ));
        }
    }

    // Choice groups
    for node in document.query(|element| matches!(element.kind, ElementKind::Group(_))) {
        let Some(element) = document.element(node) else {
            continue;
        };
        let ElementKind::Group(attrs) = &element.kind else {
            continue;
        };
        let Some(id) = &element.id else {
            errors.push(format!("Choice group {:?} has no id to save progress under", node));
            continue;
        };
        let answers_question = document.previous_sibling(node).is_some_and(|sibling| {
            matches!(
                document.element(sibling).map(|e| &e.kind),
                Some(ElementKind::Form(_))
            )
        });
        if !answers_question {
            warnings.push(format!(
                "Choice group '{}' does not follow a question; choices will not be recorded",
                id
            ));
        }
        for skipped in &attrs.skip_global_commands {
            if !globals.contains(skipped) {
                warnings.push(format!(
                    "Choice group '{}' skips unknown global command '{}'",
                    id, skipped
                ));
            }
        }
    }

    (errors, warnings)
}
