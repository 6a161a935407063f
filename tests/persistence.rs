//! Sessions written by one store are readable by a fresh one.

mod common;

use common::{runtime, write_only_policy, ScriptedService, TempDir};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use toolflow::chat::{
    ChatBot, ChatSession, FileSessionStore, SaveOutcome, SessionPersistence, SessionState,
    TurnOutcome,
};
use toolflow::tools::ToolRegistry;
use toolflow::types::ChatMessage;

#[tokio::test]
async fn settled_session_survives_reopen_and_identical_saves_are_skipped() {
    let dir = TempDir::new("persist-settled");
    let store = Arc::new(FileSessionStore::open(dir.path()).unwrap());
    let service = Arc::new(ScriptedService::new(vec![ChatMessage::assistant("hi there")]));
    let mut bot = ChatBot::new(
        runtime(service, ToolRegistry::new(), store.clone(), write_only_policy()),
        ChatSession::new("sess-0001", "tester", "Be brief."),
    );

    let outcome = bot.send("hello", &CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Settled {
            reply: Some("hi there".into())
        }
    );
    let writes = store.write_count();
    assert!(writes >= 1);

    assert_eq!(store.save(bot.session()).await.unwrap(), SaveOutcome::Unchanged);
    assert_eq!(store.write_count(), writes);

    let reopened = FileSessionStore::open(dir.path()).unwrap();
    let loaded = reopened.load("sess-0001", "tester").await.unwrap();
    assert_eq!(loaded.messages, bot.session().messages);
    assert_eq!(loaded.state, SessionState::Settled);
    assert!(loaded.pending.is_none());

    let listed = reopened.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "sess-0001");
    assert_eq!(listed[0].title, "hello");
    assert!(!listed[0].interrupted);
}

#[tokio::test]
async fn interrupted_session_is_listed_as_interrupted() {
    let dir = TempDir::new("persist-interrupted");
    let store = Arc::new(FileSessionStore::open(dir.path()).unwrap());
    let service = Arc::new(ScriptedService::default());
    let mut bot = ChatBot::new(
        runtime(service.clone(), ToolRegistry::new(), store.clone(), write_only_policy()),
        ChatSession::new("sess-0002", "tester", ""),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = bot.send("build a tower", &cancel).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Interrupted { .. }));
    assert!(service.requests().is_empty());

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].interrupted);

    let loaded = FileSessionStore::open(dir.path())
        .unwrap()
        .load("sess-0002", "tester")
        .await
        .unwrap();
    assert_eq!(loaded.state, SessionState::Interrupted);
    assert!(loaded.pending.is_some());
}
