//! TaskPilot 演示入口
//!
//! 加载配置、初始化日志、打开存储，用脚本化决策器和一个模拟浏览器执行器跑一次会话并打印结果。
//! 用法：`taskpilot [goal]`

use std::sync::Arc;

use anyhow::Context;
use taskpilot::config::load_config;
use taskpilot::core::Variables;
use taskpilot::executor::{BatchInstruction, BatchResult, CapabilityExecutor, ExecutorRegistry};
use taskpilot::react::{Decision, ScriptedOracle};
use taskpilot::workflow::TaskType;
use taskpilot::{create_agent_components, AgentSession};

fn simulated_browser(batch: &BatchInstruction, _vars: &Variables) -> Result<BatchResult, String> {
    let mut vars = Variables::new();
    vars.insert("last_instruction".to_string(), serde_json::json!(batch.instruction));
    Ok(BatchResult::completed(batch, format!("done: {}", batch.instruction)).with_variables(vars))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskpilot::observability::init();

    let goal = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let goal = if goal.trim().is_empty() {
        "click the login button".to_string()
    } else {
        goal
    };

    let cfg = load_config(None).context("Failed to load config")?;
    if let Some(parent) = cfg.storage.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
    }

    let oracle = Arc::new(ScriptedOracle::new([
        Decision::act(
            "navigate",
            serde_json::json!({ "url": "https://example.com/login" }),
            "open the login page",
        ),
        Decision::act("click", serde_json::json!({ "selector": "#login" }), "press the login button"),
        Decision::complete(""),
    ]));

    let mut registry = ExecutorRegistry::new();
    registry.register(CapabilityExecutor::new(
        "simulated-browser",
        vec![TaskType::Navigate, TaskType::Interact, TaskType::Extract, TaskType::Verify],
        simulated_browser,
    ));

    let components = create_agent_components(&cfg, oracle, registry).context("Failed to open stores")?;
    let session = AgentSession::new(components, &cfg);

    let state = session
        .execute_task(&goal, None)
        .await
        .context("Session failed to start")?;

    println!("status: {:?}", state.status);
    println!("iterations: {}", state.iteration_count);
    if let Some(result) = &state.result {
        println!("{}", result);
    }
    Ok(())
}
