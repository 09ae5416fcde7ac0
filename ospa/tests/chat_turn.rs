//! End-to-end turns of the chat step loop against a scripted provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use ospa::prelude::*;

/// Serve exactly one HTTP request with the given JSON body, returning the
/// base URL.
async fn serve_once(body: &'static str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len(),
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    format!("http://{addr}")
}

fn engine_for(mock: &Arc<MockProvider>) -> Arc<LlmEngine> {
    Arc::new(LlmEngine::with_provider(
        Arc::clone(mock) as Arc<dyn ChatProvider>,
        "mock-model",
    ))
}

fn settings() -> Setting {
    let mut setting = Setting::new("test-key", "gpt-4o-mini", "e2e_agent");
    setting.global_prompt = "你是一個專業的顧問".to_owned();
    setting.top_k = 0;
    setting
}

fn greeting_memory() -> Memory {
    let mut memory = Memory::new();
    let mut action = Action::send_message("您好！请问有什么可以帮您？");
    let mut result = Map::new();
    result.insert("user_message".to_owned(), Value::String(String::new()));
    action.result = Some(result);
    memory.push(Step::new("", vec![action]));
    memory
}

#[tokio::test]
async fn greeting_bootstrap_appends_exactly_one_step() {
    let mock = Arc::new(MockProvider::new());
    mock.push_text("您好！我是您的专业顾问，很高兴为您服务。");
    let service = ChatService::new().with_engine(engine_for(&mock));

    let response = service
        .chat_turn(ChatTurnRequest {
            user_message: String::new(),
            settings: settings(),
            ..Default::default()
        })
        .await;

    assert_eq!(response.result_type, ResultType::Success);
    assert!(response.llm_calling_times >= 1);
    assert_eq!(response.memory.len(), 1);

    let step = response.memory.last_step().expect("one step");
    assert_eq!(step.actions.len(), 1);
    let action = &step.actions[0];
    assert!(action.is_send_message());
    assert!(action.is_completed());
    assert!(!action.agent_message().unwrap_or_default().is_empty());
    assert_eq!(
        response.response.as_deref(),
        action.agent_message()
    );
}

#[tokio::test]
async fn tool_dispatch_executes_http_then_reply() {
    let base_url = serve_once(r#"{"time": "2024-06-01T14:00:00+08:00"}"#).await;

    let mock = Arc::new(MockProvider::new());
    // Empty state machine: dynamic state creation first.
    mock.push_text("Look up the current time, then answer the user.");
    mock.push_tool_calls(vec![
        ToolCall::new(
            "call_1",
            "get_time",
            r#"{"request_params": {"latitude": 39.9, "longitude": 116.4}}"#,
        ),
        ToolCall::new(
            "call_2",
            "send_message_to_user",
            r#"{"agent_message": "北京现在是下午两点。"}"#,
        ),
    ]);
    let service = ChatService::new().with_engine(engine_for(&mock));

    let mut params = Map::new();
    params.insert("latitude".to_owned(), serde_json::json!({"type": "number"}));
    params.insert("longitude".to_owned(), serde_json::json!({"type": "number"}));
    let get_time = RequestTool::new(
        "get_time",
        "Get the current time at a coordinate.",
        format!("{base_url}/current/coordinate"),
        RequestMethod::Get,
    )
    .request_params(params);

    let response = service
        .chat_turn(ChatTurnRequest {
            user_message: "北京现在几点?".to_owned(),
            settings: settings(),
            memory: greeting_memory(),
            request_tools: vec![Arc::new(get_time)],
            ..Default::default()
        })
        .await;

    assert_eq!(response.result_type, ResultType::Success);
    assert_eq!(response.response.as_deref(), Some("北京现在是下午两点。"));
    assert_eq!(response.memory.len(), 2);

    let step = response.memory.last_step().expect("appended step");
    assert_eq!(step.actions.len(), 2);
    assert!(step.actions.iter().all(Action::is_completed));

    let http_result = step.actions[0].result.as_ref().expect("http result");
    assert_eq!(http_result["status_code"], 200);
    assert_eq!(http_result["content"]["time"], "2024-06-01T14:00:00+08:00");
}

#[tokio::test]
async fn fsm_turn_moves_from_greeting_to_conversation() {
    let mut setting = settings();
    let mut states = std::collections::BTreeMap::new();
    states.insert(
        "greeting".to_owned(),
        State::new("greeting", "Opening", "Greet the user."),
    );
    states.insert(
        "conversation".to_owned(),
        State::new("conversation", "Main dialogue", "Answer the user."),
    );
    states.insert(
        "closing".to_owned(),
        State::new("closing", "Wrapping up", "Say goodbye."),
    );
    let mut out = std::collections::BTreeMap::new();
    out.insert("greeting".to_owned(), vec!["conversation".to_owned()]);
    out.insert(
        "conversation".to_owned(),
        vec!["conversation".to_owned(), "closing".to_owned()],
    );
    setting.state_machine = StateMachine {
        initial_state_name: "greeting".to_owned(),
        states,
        out_transitions: out,
    };

    let mut memory = Memory::new();
    let mut action = Action::send_message("您好！");
    let mut result = Map::new();
    result.insert("user_message".to_owned(), Value::String(String::new()));
    action.result = Some(result);
    memory.push(Step::new("greeting", vec![action]));

    let mock = Arc::new(MockProvider::new());
    // The only allowed transition is greeting -> conversation, so no state
    // selection call happens; one call selects actions.
    mock.push_text("我可以帮您解答问题。");
    let service = ChatService::new().with_engine(engine_for(&mock));

    let response = service
        .chat_turn(ChatTurnRequest {
            user_message: "介绍一下你自己".to_owned(),
            settings: setting,
            memory,
            ..Default::default()
        })
        .await;

    assert_eq!(response.result_type, ResultType::Success);
    let step = response.memory.last_step().expect("step");
    assert_eq!(step.state_name, "conversation");
}

#[tokio::test]
async fn duplicate_tool_fails_with_no_llm_calls_and_memory_unchanged() {
    let mock = Arc::new(MockProvider::new());
    let service = ChatService::new().with_engine(engine_for(&mock));

    let memory = greeting_memory();
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(RequestTool::new(
            "get_time",
            "a",
            "http://localhost/a",
            RequestMethod::Get,
        )),
        Arc::new(RequestTool::new(
            "get_time",
            "b",
            "http://localhost/b",
            RequestMethod::Get,
        )),
    ];

    let response = service
        .chat_turn(ChatTurnRequest {
            user_message: "hi".to_owned(),
            settings: settings(),
            memory: memory.clone(),
            request_tools: tools,
            ..Default::default()
        })
        .await;

    assert_eq!(response.result_type, ResultType::Error);
    assert_eq!(response.llm_calling_times, 0);
    assert_eq!(mock.request_count(), 0);
    assert_eq!(response.memory, memory);
}

/// Tool that requests cancellation from inside its own execution, to
/// exercise the checkpoint between two actions of one step.
#[derive(Debug)]
struct TripCancel {
    flag: CancelFlag,
}

#[async_trait]
impl Tool for TripCancel {
    fn name(&self) -> String {
        "trip_cancel".to_owned()
    }

    fn description(&self) -> String {
        "Trips the turn's cancel flag.".to_owned()
    }

    async fn execute(
        &self,
        _args: Map<String, Value>,
    ) -> std::result::Result<Map<String, Value>, ToolError> {
        self.flag.cancel();
        let mut result = Map::new();
        result.insert("tripped".to_owned(), Value::Bool(true));
        Ok(result)
    }
}

#[tokio::test]
async fn cancellation_between_actions_leaves_memory_unchanged() {
    let mock = Arc::new(MockProvider::new());
    mock.push_text("instruction");
    mock.push_tool_calls(vec![
        ToolCall::new("c1", "trip_cancel", "{}"),
        ToolCall::new("c2", "send_message_to_user", r#"{"agent_message": "never sent"}"#),
    ]);
    let service = ChatService::new().with_engine(engine_for(&mock));

    let cancel = CancelFlag::new();
    let memory = greeting_memory();

    let response = service
        .chat_turn(ChatTurnRequest {
            user_message: "go".to_owned(),
            settings: settings(),
            memory: memory.clone(),
            request_tools: vec![Arc::new(TripCancel {
                flag: cancel.clone(),
            })],
            cancel,
            ..Default::default()
        })
        .await;

    assert_eq!(response.result_type, ResultType::Cancelled);
    assert!(response.response.is_none());
    // The first action's side effect happened, but the partial step was
    // not appended.
    assert_eq!(response.memory, memory);
}

#[tokio::test]
async fn edited_last_response_replaces_assistant_message() {
    let mock = Arc::new(MockProvider::new());
    mock.push_text("instruction");
    mock.push_text("收到。");
    let service = ChatService::new().with_engine(engine_for(&mock));

    let response = service
        .chat_turn(ChatTurnRequest {
            user_message: String::new(),
            edited_last_response: Some("您好，我是改写后的问候。".to_owned()),
            settings: settings(),
            memory: greeting_memory(),
            ..Default::default()
        })
        .await;

    assert_eq!(response.result_type, ResultType::Success);
    let first_step = &response.memory.history[0];
    assert_eq!(
        first_step.actions[0].agent_message(),
        Some("您好，我是改写后的问候。")
    );
}
