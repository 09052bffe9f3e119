use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use mcp_chat::conversation::ConversationHistory;
use mcp_chat::llm::normalize::{IMAGE_GENERATION_FAILED, IMAGE_GENERATION_TOOL};
use mcp_chat::llm::{
    Completion, LlmBackend, Message, Orchestrator, ToolCall, ToolExecutionResult, ToolExecutor,
};
use mcp_chat::mcp::registry::ToolDescriptor;
use serde_json::{Map, Value, json};

/// Backend replaying canned completions and recording what it was sent.
struct ScriptedBackend {
    replies: Mutex<VecDeque<Completion>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Completion>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl LlmBackend for ScriptedBackend {
    async fn complete(
        &self,
        history: &ConversationHistory,
        _tools: &[ToolDescriptor],
    ) -> anyhow::Result<Completion> {
        self.seen.lock().unwrap().push(history.messages().to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

/// Backend that keeps asking for the same tool forever.
struct LoopingBackend;

#[async_trait::async_trait]
impl LlmBackend for LoopingBackend {
    async fn complete(
        &self,
        history: &ConversationHistory,
        _tools: &[ToolDescriptor],
    ) -> anyhow::Result<Completion> {
        Ok(Completion::ToolCalls {
            content: None,
            calls: vec![ToolCall::function(
                format!("call_{}", history.len()),
                "get_weather",
                r#"{"city":"北京"}"#,
            )],
        })
    }
}

struct WeatherExecutor {
    requests: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl WeatherExecutor {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ToolExecutor for WeatherExecutor {
    async fn execute(&self, tool_name: &str, arguments: Map<String, Value>) -> ToolExecutionResult {
        self.requests
            .lock()
            .unwrap()
            .push((tool_name.to_string(), arguments.clone()));
        let city = arguments.get("city").and_then(Value::as_str).unwrap_or("?");
        let date = arguments.get("date").and_then(Value::as_str).unwrap_or("今天");
        ToolExecutionResult::success(tool_name, format!("{city}{date}的天气：温度 25°C，晴朗"))
    }
}

struct FailingExecutor;

#[async_trait::async_trait]
impl ToolExecutor for FailingExecutor {
    async fn execute(&self, _tool_name: &str, _arguments: Map<String, Value>) -> ToolExecutionResult {
        ToolExecutionResult::failure("connection reset by peer")
    }
}

fn weather_call(id: &str, args: &str) -> Completion {
    Completion::ToolCalls {
        content: None,
        calls: vec![ToolCall::function(id, "get_weather", args)],
    }
}

fn assert_replies_follow_requests(history: &ConversationHistory) {
    let mut requested: Vec<&str> = Vec::new();
    for msg in history.messages() {
        match msg {
            Message::Assistant { tool_calls, .. } => {
                requested.extend(tool_calls.iter().map(|c| c.id.as_str()));
            }
            Message::Tool { tool_call_id, .. } => {
                assert!(
                    requested.contains(&tool_call_id.as_str()),
                    "tool result {tool_call_id} has no earlier request"
                );
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_weather_query_traces_call_and_returns_answer() {
    let backend = ScriptedBackend::new(vec![
        weather_call("call_1", r#"{"city": "北京", "date": "今天"}"#),
        Completion::Text("北京今天晴朗，气温 25°C。".to_string()),
    ]);
    let orchestrator = Orchestrator::new(backend.clone());
    let executor = WeatherExecutor::new();
    let mut history = ConversationHistory::new();

    let out = orchestrator
        .run_turn("查询北京的天气", &mut history, &[], &executor)
        .await
        .unwrap();

    assert_eq!(
        out,
        "[Calling tool get_weather with args {'city': '北京', 'date': '今天'}]\n北京今天晴朗，气温 25°C。"
    );
    assert_eq!(backend.calls(), 2);

    // the second request carries the tool result verbatim
    let seen = backend.seen.lock().unwrap();
    assert_eq!(
        seen[1].last(),
        Some(&Message::Tool {
            tool_call_id: "call_1".to_string(),
            content: "北京今天的天气：温度 25°C，晴朗".to_string(),
        })
    );

    assert_eq!(history.len(), 4);
    assert_replies_follow_requests(&history);
}

#[tokio::test]
async fn test_failing_tool_is_reported_and_turn_completes() {
    let backend = ScriptedBackend::new(vec![
        weather_call("call_1", r#"{"city": "北京"}"#),
        Completion::Text("抱歉，暂时无法获取天气。".to_string()),
    ]);
    let orchestrator = Orchestrator::new(backend);
    let mut history = ConversationHistory::new();

    let out = orchestrator
        .run_turn("查询北京的天气", &mut history, &[], &FailingExecutor)
        .await
        .unwrap();

    assert!(out.contains("Error: connection reset by peer"));
    assert!(out.ends_with("抱歉，暂时无法获取天气。"));
    assert!(matches!(
        &history.messages()[2],
        Message::Tool { content, .. } if content == "Error: connection reset by peer"
    ));
}

#[tokio::test]
async fn test_malformed_arguments_become_tool_errors() {
    let backend = ScriptedBackend::new(vec![
        weather_call("call_1", "{city: 北京"),
        Completion::Text("参数有误".to_string()),
    ]);
    let orchestrator = Orchestrator::new(backend);
    let executor = WeatherExecutor::new();
    let mut history = ConversationHistory::new();

    let out = orchestrator
        .run_turn("天气", &mut history, &[], &executor)
        .await
        .unwrap();

    assert!(executor.requests.lock().unwrap().is_empty());
    assert!(out.contains("Error: invalid tool arguments"));
    assert_replies_follow_requests(&history);
}

#[tokio::test]
async fn test_empty_arguments_mean_no_arguments() {
    let backend = ScriptedBackend::new(vec![
        weather_call("call_1", ""),
        Completion::Text("ok".to_string()),
    ]);
    let orchestrator = Orchestrator::new(backend);
    let executor = WeatherExecutor::new();
    let mut history = ConversationHistory::new();

    let out = orchestrator
        .run_turn("天气", &mut history, &[], &executor)
        .await
        .unwrap();

    assert!(out.starts_with("[Calling tool get_weather with args {}]"));
    assert!(executor.requests.lock().unwrap()[0].1.is_empty());
}

#[tokio::test]
async fn test_user_message_is_appended_once_before_anything_else() {
    let backend = ScriptedBackend::new(vec![Completion::Text("你好".to_string())]);
    let orchestrator = Orchestrator::new(backend.clone());
    let mut history = ConversationHistory::new();
    history.push_user("earlier");
    history.push_assistant_text("earlier answer");

    let out = orchestrator
        .run_turn("hi", &mut history, &[], &WeatherExecutor::new())
        .await
        .unwrap();

    assert_eq!(out, "你好");
    let seen = backend.seen.lock().unwrap();
    assert_eq!(
        seen[0].last(),
        Some(&Message::User {
            content: "hi".to_string()
        })
    );
    let user_count = history
        .messages()
        .iter()
        .filter(|m| matches!(m, Message::User { content } if content == "hi"))
        .count();
    assert_eq!(user_count, 1);
}

#[tokio::test]
async fn test_several_rounds_and_parallel_calls() {
    let backend = ScriptedBackend::new(vec![
        Completion::ToolCalls {
            content: Some("先查两个城市".to_string()),
            calls: vec![
                ToolCall::function("a", "get_weather", r#"{"city":"北京"}"#),
                ToolCall::function("b", "get_weather", r#"{"city":"上海"}"#),
            ],
        },
        weather_call("c", r#"{"city":"广州","date":"明天"}"#),
        Completion::Text("都是晴天".to_string()),
    ]);
    let orchestrator = Orchestrator::new(backend.clone());
    let executor = WeatherExecutor::new();
    let mut history = ConversationHistory::new();

    let out = orchestrator
        .run_turn("三个城市的天气", &mut history, &[], &executor)
        .await
        .unwrap();

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "先查两个城市",
            "[Calling tool get_weather with args {'city': '北京'}]",
            "[Calling tool get_weather with args {'city': '上海'}]",
            "[Calling tool get_weather with args {'city': '广州', 'date': '明天'}]",
            "都是晴天",
        ]
    );
    assert_eq!(backend.calls(), 3);
    assert_eq!(executor.requests.lock().unwrap().len(), 3);
    assert!(history.orphaned_tool_results().is_empty());
    assert_replies_follow_requests(&history);
}

#[tokio::test]
async fn test_image_tool_results_are_normalized() {
    struct ImageExecutor;

    #[async_trait::async_trait]
    impl ToolExecutor for ImageExecutor {
        async fn execute(&self, tool_name: &str, _arguments: Map<String, Value>) -> ToolExecutionResult {
            ToolExecutionResult::success(tool_name, json!({"code": 1, "data": {}}).to_string())
        }
    }

    let backend = ScriptedBackend::new(vec![
        Completion::ToolCalls {
            content: None,
            calls: vec![ToolCall::function("i", IMAGE_GENERATION_TOOL, r#"{"prompt":"cat"}"#)],
        },
        Completion::Text("done".to_string()),
    ]);
    let orchestrator = Orchestrator::new(backend);
    let mut history = ConversationHistory::new();

    orchestrator
        .run_turn("画一只猫", &mut history, &[], &ImageExecutor)
        .await
        .unwrap();

    assert!(matches!(
        &history.messages()[2],
        Message::Tool { content, .. } if content == IMAGE_GENERATION_FAILED
    ));
}

#[tokio::test]
async fn test_iteration_cap_stops_runaway_loop() {
    let orchestrator =
        Orchestrator::new(Arc::new(LoopingBackend)).with_max_tool_iterations(Some(3));
    let executor = WeatherExecutor::new();
    let mut history = ConversationHistory::new();

    let out = orchestrator
        .run_turn("天气", &mut history, &[], &executor)
        .await
        .unwrap();

    assert_eq!(executor.requests.lock().unwrap().len(), 3);
    assert!(out.ends_with("[Stopped after 3 tool-call rounds without a final answer]"));
    assert!(history.orphaned_tool_results().is_empty());
    assert_replies_follow_requests(&history);
}

#[tokio::test]
async fn test_backend_error_aborts_turn() {
    let backend = ScriptedBackend::new(Vec::new());
    let orchestrator = Orchestrator::new(backend);
    let mut history = ConversationHistory::new();

    let err = orchestrator
        .run_turn("hi", &mut history, &[], &WeatherExecutor::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("script exhausted"));
}
