//! 历史摘要器
//!
//! 把较早的动作折叠进滚动摘要。RuleBasedSummarizer 每步一行 [✓]/[✗]，超出上限时保留最近的行并记下被折叠的条数；
//! LlmSummarizer 调用 LLM，失败时回退到规则摘要。输出长度不超过 max_chars。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{truncate_chars, Action};
use crate::llm::{LlmClient, Message};

/// 摘要器 trait
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// 将 actions 合并进已有摘要，返回新摘要（不超过 max_chars 字符）
    async fn summarize(&self, existing: Option<&str>, actions: &[Action], max_chars: usize) -> String;
}

/// 单步摘要行
pub fn marker_line(action: &Action) -> String {
    match &action.result {
        Some(r) if r.success => format!("[✓] {}", action.describe()),
        Some(r) => format!(
            "[✗] {}: {}",
            action.describe(),
            truncate_chars(r.error.as_deref().unwrap_or("unknown error"), 120)
        ),
        None => format!("[ ] {}", action.describe()),
    }
}

const FOLDED_PREFIX: &str = "(+";

/// 规则摘要：不依赖外部服务
#[derive(Debug, Default, Clone)]
pub struct RuleBasedSummarizer;

impl RuleBasedSummarizer {
    pub fn new() -> Self {
        Self
    }

    pub fn summarize_sync(&self, existing: Option<&str>, actions: &[Action], max_chars: usize) -> String {
        let mut folded = 0usize;
        let mut lines: Vec<String> = Vec::new();
        for line in existing.unwrap_or("").lines() {
            let t = line.trim();
            if t.is_empty() {
                continue;
            }
            if let Some(n) = parse_folded(t) {
                folded += n;
            } else {
                lines.push(t.to_string());
            }
        }
        lines.extend(actions.iter().map(marker_line));
        fit_lines(lines, folded, max_chars)
    }
}

#[async_trait]
impl Summarizer for RuleBasedSummarizer {
    async fn summarize(&self, existing: Option<&str>, actions: &[Action], max_chars: usize) -> String {
        self.summarize_sync(existing, actions, max_chars)
    }
}

/// 解析折叠计数行 "(+N earlier steps)"
fn parse_folded(line: &str) -> Option<usize> {
    line.strip_prefix(FOLDED_PREFIX)?
        .strip_suffix(" earlier steps)")?
        .parse()
        .ok()
}

/// 从最新的行往前保留，直到达到字符上限；被丢弃的行计入折叠计数
fn fit_lines(lines: Vec<String>, mut folded: usize, max_chars: usize) -> String {
    let max_chars = max_chars.max(20);
    // 为折叠计数行预留空间
    let reserve = 32;
    let budget = max_chars.saturating_sub(reserve);

    let mut kept: Vec<String> = Vec::new();
    let mut used = 0usize;
    let total = lines.len();
    for (i, line) in lines.into_iter().rev().enumerate() {
        let line = truncate_chars(&line, budget.max(1));
        let cost = line.chars().count() + usize::from(!kept.is_empty());
        if used + cost > budget {
            folded += total - i;
            break;
        }
        used += cost;
        kept.push(line);
    }
    kept.reverse();

    let mut out = String::new();
    if folded > 0 {
        out.push_str(&format!("{}{} earlier steps)", FOLDED_PREFIX, folded));
        if !kept.is_empty() {
            out.push('\n');
        }
    }
    out.push_str(&kept.join("\n"));
    truncate_chars(&out, max_chars)
}

/// LLM 摘要器：失败或返回空时回退到规则摘要
pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
    fallback: RuleBasedSummarizer,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            fallback: RuleBasedSummarizer,
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, existing: Option<&str>, actions: &[Action], max_chars: usize) -> String {
        let steps = actions.iter().map(marker_line).collect::<Vec<_>>().join("\n");
        let prompt = format!(
            "Existing summary:\n{}\n\nNew steps:\n{}\n\n\
             Merge the new steps into the summary. Keep every failure and the selectors involved. \
             Reply with the summary only, at most {} characters.",
            existing.unwrap_or("(none)"),
            steps,
            max_chars
        );
        let messages = [
            Message::system("You compress browser automation logs into short factual summaries."),
            Message::user(prompt),
        ];
        match self.llm.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => truncate_chars(text.trim(), max_chars),
            Ok(_) => self.fallback.summarize_sync(existing, actions, max_chars),
            Err(e) => {
                tracing::warn!(error = %e, "LLM summarization failed, using rule-based summary");
                self.fallback.summarize_sync(existing, actions, max_chars)
            }
        }
    }
}
