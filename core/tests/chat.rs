//! Chat service tests.

mod common;

use std::time::Duration;

use common::{Scripted, ScriptedAgent};
use pretty_assertions::assert_eq;
use sprint_core::chat::ChatService;
use sprint_events::EventBus;
use sprint_protocol::AgentRole;

fn service(agent: std::sync::Arc<ScriptedAgent>) -> ChatService {
    ChatService::new(
        agent,
        EventBus::new(),
        std::env::temp_dir(),
        Default::default(),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn create_send_close_round_trip() {
    let agent = ScriptedAgent::new();
    agent.script(
        AgentRole::General,
        Scripted::Text("hello operator".into()),
    );
    let chat = service(agent.clone());

    let handle = chat.create(AgentRole::General).await.unwrap();
    assert_eq!(handle.chat_id, "chat-1");
    assert_eq!(handle.role, AgentRole::General);
    assert_eq!(chat.list().len(), 1);

    let response = chat.send(&handle.chat_id, "hi there").await.unwrap();
    assert_eq!(response, "hello operator");
    assert_eq!(agent.prompts_for(AgentRole::General), vec!["hi there"]);

    chat.close(&handle.chat_id).await.unwrap();
    assert!(chat.list().is_empty());
    // Closing twice is fine.
    chat.close(&handle.chat_id).await.unwrap();
}

#[tokio::test]
async fn chats_have_their_own_id_namespace() {
    let agent = ScriptedAgent::new();
    let chat = service(agent);

    let first = chat.create(AgentRole::General).await.unwrap();
    let second = chat.create(AgentRole::Planner).await.unwrap();
    assert_eq!(first.chat_id, "chat-1");
    assert_eq!(second.chat_id, "chat-2");
    assert_ne!(first.session_id, second.session_id);
}

#[tokio::test]
async fn send_to_unknown_chat_fails() {
    let agent = ScriptedAgent::new();
    let chat = service(agent);
    let err = chat.send("chat-99", "hello").await.unwrap_err();
    assert!(err.to_string().contains("unknown chat"));
}
