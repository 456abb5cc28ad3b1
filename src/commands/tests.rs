use super::*;
use crate::backend::scripted::ScriptedBackend;
use crate::backend::ModelAdapter;
use crate::tools::ToolRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn engine() -> ConversationEngine {
    ConversationEngine::new(
        &ModelAdapter::Scripted(ScriptedBackend::default()),
        None,
        ToolRegistry::new(),
    )
}

fn pirate_dispatcher() -> SlashCommandDispatcher {
    SlashCommandDispatcher::from_config(&[CommandConfig {
        trigger: "pirate".into(),
        text: "Talk like a pirate for the rest of this chat.".into(),
        help: None,
        ask: None,
    }])
}

#[test]
fn text_injection_returns_payload_unchanged() {
    let mut dispatcher = pirate_dispatcher();
    assert_eq!(
        dispatcher.dispatch("/pirate", &engine()),
        DispatchResult::TextInjection("Talk like a pirate for the rest of this chat.".into())
    );
}

#[test]
fn extra_words_follow_a_blank_line() {
    let mut dispatcher = pirate_dispatcher();
    assert_eq!(
        dispatcher.dispatch("/pirate  and rhyme  ", &engine()),
        DispatchResult::TextInjection(
            "Talk like a pirate for the rest of this chat.\n\nand rhyme".into()
        )
    );
}

#[test]
fn ordinary_text_and_bare_slash_are_not_commands() {
    let mut dispatcher = pirate_dispatcher();
    let engine = engine();
    assert_eq!(dispatcher.dispatch("hello /pirate", &engine), DispatchResult::NotASlashCommand);
    assert_eq!(dispatcher.dispatch("/", &engine), DispatchResult::NotASlashCommand);
    assert_eq!(dispatcher.dispatch("/ pirate", &engine), DispatchResult::NotASlashCommand);
}

#[test]
fn lookup_is_exact() {
    let mut dispatcher = pirate_dispatcher();
    let engine = engine();
    assert_eq!(
        dispatcher.dispatch("/Pirate", &engine),
        DispatchResult::UnknownCommand("Pirate".into())
    );
    assert_eq!(
        dispatcher.dispatch("/pir", &engine),
        DispatchResult::UnknownCommand("pir".into())
    );
}

#[test]
fn interactive_handlers_run_on_each_dispatch() {
    let mut dispatcher = SlashCommandDispatcher::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    dispatcher.register(SlashCommandEntry::interactive("count", move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("call {n}")
    }));
    let engine = engine();

    assert_eq!(
        dispatcher.dispatch("/count", &engine),
        DispatchResult::TextInjection("call 1".into())
    );
    assert_eq!(
        dispatcher.dispatch("/count", &engine),
        DispatchResult::TextInjection("call 2".into())
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn builtins_cannot_be_shadowed() {
    let mut dispatcher = SlashCommandDispatcher::new();
    assert!(!dispatcher.register(SlashCommandEntry::text("quit", "never")));
    assert!(!dispatcher.register(SlashCommandEntry::text("two words", "never")));
    assert!(dispatcher.register(SlashCommandEntry::text("joke", "Tell me a joke.")));
    assert!(dispatcher.register(SlashCommandEntry::text("joke", "Tell me a pun.")));

    let triggers = dispatcher.triggers();
    assert_eq!(triggers, ["help", "tools", "history", "quit", "joke"]);
    assert_eq!(
        dispatcher.dispatch("/joke", &engine()),
        DispatchResult::TextInjection("Tell me a pun.".into())
    );
}

#[test]
fn config_triggers_may_include_the_slash() {
    let dispatcher = SlashCommandDispatcher::from_config(&[CommandConfig {
        trigger: "/review".into(),
        text: "Review the last change.".into(),
        help: Some("Ask for a code review.".into()),
        ask: None,
    }]);
    let entry = dispatcher.entries().last().unwrap();
    assert_eq!(entry.trigger, "review");
    assert_eq!(entry.summary(), "Ask for a code review.");
}

#[test]
fn quit_and_help_are_handled_locally() {
    let mut dispatcher = pirate_dispatcher();
    let engine = engine();

    match dispatcher.dispatch("/quit", &engine) {
        DispatchResult::Handled(output) => assert!(output.quit),
        other => panic!("expected handled quit, got {other:?}"),
    }
    match dispatcher.dispatch("/help", &engine) {
        DispatchResult::Handled(output) => {
            assert!(!output.quit);
            assert!(output.text.contains("/pirate   Send \"Talk like a pirate"));
            assert!(output.text.contains("/history  Show how many messages"));
        }
        other => panic!("expected handled help, got {other:?}"),
    }
}

#[test]
fn tools_and_history_describe_the_engine() {
    let mut dispatcher = SlashCommandDispatcher::new();
    let engine = engine();

    assert_eq!(
        dispatcher.dispatch("/tools", &engine),
        DispatchResult::Handled(CommandOutput::show("No tools are enabled."))
    );
    assert_eq!(
        dispatcher.dispatch("/history", &engine),
        DispatchResult::Handled(CommandOutput::show(
            "0 messages: 0 from you, 0 from the assistant (0 final), 0 tool results."
        ))
    );
}

fn ask_command(text: &str) -> CommandConfig {
    CommandConfig {
        trigger: "explain".into(),
        text: text.into(),
        help: None,
        ask: Some("Which file?".into()),
    }
}

#[test]
fn ask_commands_fill_the_placeholder() {
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    let mut dispatcher = SlashCommandDispatcher::from_config_with(
        &[ask_command("Explain {input} to a new contributor.")],
        move |question: &str| {
            assert_eq!(question, "Which file?");
            counter.fetch_add(1, Ordering::SeqCst);
            Some("  src/main.rs\n".to_string())
        },
    );

    assert_eq!(
        dispatcher.dispatch("/explain", &engine()),
        DispatchResult::TextInjection("Explain src/main.rs to a new contributor.".into())
    );
    assert_eq!(asked.load(Ordering::SeqCst), 1);
    let entry = dispatcher.entries().last().unwrap();
    assert_eq!(entry.summary(), "Asks \"Which file?\" first.");
}

#[test]
fn ask_answers_follow_text_without_a_placeholder() {
    let mut dispatcher = SlashCommandDispatcher::from_config_with(
        &[ask_command("Summarize this file.")],
        |_: &str| Some("notes.md".to_string()),
    );
    assert_eq!(
        dispatcher.dispatch("/explain", &engine()),
        DispatchResult::TextInjection("Summarize this file.\n\nnotes.md".into())
    );
}

#[test]
fn unanswered_ask_commands_are_cancelled() {
    let mut dispatcher = SlashCommandDispatcher::from_config(&[ask_command("Explain {input}.")]);
    assert_eq!(
        dispatcher.dispatch("/explain", &engine()),
        DispatchResult::Handled(CommandOutput::show("Command cancelled."))
    );

    let mut blank = SlashCommandDispatcher::from_config_with(
        &[ask_command("Explain {input}.")],
        |_: &str| Some("   ".to_string()),
    );
    assert!(matches!(
        blank.dispatch("/explain", &engine()),
        DispatchResult::Handled(_)
    ));
}
