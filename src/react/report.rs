//! 执行报告
//!
//! 报告只由 action_history 推导，同一历史总是得到同一文本。

use crate::core::Action;

fn step_line(action: &Action) -> String {
    match &action.result {
        Some(r) if r.success => format!("[✓] {}", action.describe()),
        Some(r) => format!(
            "[✗] {}: {}",
            action.describe(),
            r.error.as_deref().unwrap_or("unknown error")
        ),
        None => format!("[ ] {}", action.describe()),
    }
}

/// 全部步骤，按执行顺序
pub fn execution_report(history: &[Action]) -> String {
    if history.is_empty() {
        return "No actions executed.".to_string();
    }
    history.iter().map(step_line).collect::<Vec<_>>().join("\n")
}

/// 失败报告：已完成步骤 + 触发终止的那一步失败
///
/// 只有最后一个动作失败时才把它列为失败步骤；因迭代上限、循环、取消、死锁终止时
/// 最后一步可能是成功的，此时写 `(none)`，不追溯更早的失败。
pub fn failure_report(reason: &str, history: &[Action]) -> String {
    let completed: Vec<String> = history
        .iter()
        .filter(|a| a.succeeded())
        .map(|a| format!("  [✓] {}", a.describe()))
        .collect();

    let mut out = format!("Task failed: {}\n", reason);
    out.push_str("Completed steps:\n");
    if completed.is_empty() {
        out.push_str("  (none)\n");
    } else {
        out.push_str(&completed.join("\n"));
        out.push('\n');
    }
    match history.last().filter(|a| a.failed()) {
        Some(failed) => {
            let error = failed
                .result
                .as_ref()
                .and_then(|r| r.error.as_deref())
                .unwrap_or("unknown error");
            out.push_str(&format!("Failed step:\n  [✗] {}: {}", failed.describe(), error));
        }
        None => out.push_str("Failed step: (none)"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ActionResult;

    fn action(tool: &str, selector: &str, error: Option<&str>) -> Action {
        let mut a = Action::new(tool, serde_json::json!({ "selector": selector }), "");
        a.result = Some(ActionResult {
            success: error.is_none(),
            error: error.map(str::to_string),
            duration: 5,
        });
        a
    }

    #[test]
    fn test_execution_report_markers() {
        let history = vec![
            action("click", "#login", None),
            action("type", "#user", Some("not interactable")),
        ];
        assert_eq!(
            execution_report(&history),
            "[✓] click(selector=#login)\n[✗] type(selector=#user): not interactable"
        );
        assert_eq!(execution_report(&[]), "No actions executed.");
    }

    #[test]
    fn test_failure_report_is_deterministic() {
        let history = vec![
            action("navigate", "https://example.com", None),
            action("click", "#a", Some("first error")),
            action("click", "#b", None),
            action("click", "#missing", Some("element #missing not found")),
        ];
        let a = failure_report("too many consecutive failures", &history);
        let b = failure_report("too many consecutive failures", &history);
        assert_eq!(a, b);
        assert!(a.starts_with("Task failed: too many consecutive failures"));
        assert!(a.contains("  [✓] navigate(selector=https://example.com)\n  [✓] click(selector=#b)"));
        assert!(a.ends_with("Failed step:\n  [✗] click(selector=#missing): element #missing not found"));
        assert!(!a.contains("first error"));
    }

    #[test]
    fn test_failure_report_ignores_earlier_failures() {
        let history = vec![
            action("click", "#a", Some("element #a not found")),
            action("click", "#b", None),
        ];
        let report = failure_report("timeout: max iterations (2) reached", &history);
        assert_eq!(
            report,
            "Task failed: timeout: max iterations (2) reached\n\
             Completed steps:\n  [✓] click(selector=#b)\n\
             Failed step: (none)"
        );
    }
}
