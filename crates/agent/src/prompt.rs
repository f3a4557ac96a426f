//! Builds the system/developer messages that seed every run's history:
//! the prompt is assembled from config before the first model call
//! rather than hardcoded.

use std::path::Path;

use sa_engine_domain::config::PromptConfig;
use sa_engine_domain::{Message, Result};

const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous agent. You have access to a set \
of tools and, where configured, a library of skills referenced as $[namespace].name in the \
task. Use tools to accomplish the task, request approval when a tool requires it, and stop \
and report failure rather than guessing when you cannot proceed.";

async fn read_prompt_file(path: &Path) -> Result<String> {
    Ok(tokio::fs::read_to_string(path).await?)
}

/// `system_text` wins over `system_path`, which wins over an inline
/// `template`, which wins over the built-in default. `include_skills_list`
/// appends the configured namespaces so the model knows what `$[ns].name`
/// prefixes are valid to mention.
pub async fn build_system_message(config: &PromptConfig, skill_namespaces: &[String]) -> Result<Message> {
    let mut text = if let Some(t) = &config.system_text {
        t.clone()
    } else if let Some(path) = &config.system_path {
        read_prompt_file(path).await?
    } else if let Some(template) = &config.template {
        template.clone()
    } else {
        DEFAULT_SYSTEM_PROMPT.to_string()
    };

    if config.include_skills_list && !skill_namespaces.is_empty() {
        text.push_str("\n\nAvailable skill namespaces: ");
        text.push_str(&skill_namespaces.join(", "));
    }

    Ok(Message::system(text))
}

/// Folded onto a second `system`-role message — `sa_engine_domain::Role`
/// has no separate `Developer` variant, so a configured developer prompt
/// rides alongside the system prompt instead of as its own role.
pub async fn build_developer_message(config: &PromptConfig) -> Result<Option<Message>> {
    let text = if let Some(t) = &config.developer_text {
        Some(t.clone())
    } else if let Some(path) = &config.developer_path {
        Some(read_prompt_file(path).await?)
    } else {
        None
    };
    Ok(text.map(Message::system))
}

/// Truncates history to `max_messages`/`max_chars` from the tail, keeping
/// the leading system messages intact — the same shape `ContextRecovery`
/// produces after a compaction, so downstream code treats both uniformly.
pub fn cap_history(history: Vec<Message>, max_messages: usize, max_chars: usize) -> Vec<Message> {
    let system_count = history.iter().take_while(|m| m.role == sa_engine_domain::Role::System).count();
    if history.len() <= max_messages {
        return history;
    }
    let (system, rest) = history.split_at(system_count);
    let keep_from_tail = max_messages.saturating_sub(system_count);
    let tail_start = rest.len().saturating_sub(keep_from_tail);
    let mut kept: Vec<Message> = system.to_vec();
    kept.extend_from_slice(&rest[tail_start..]);

    let mut total_chars: usize = kept.iter().map(|m| m.content.extract_all_text().len()).sum();
    while total_chars > max_chars && kept.len() > system_count + 1 {
        let removed = kept.remove(system_count);
        total_chars = total_chars.saturating_sub(removed.content.extract_all_text().len());
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_engine_domain::config::PromptConfig;

    #[tokio::test]
    async fn system_text_wins_over_template() {
        let config = PromptConfig {
            system_text: Some("explicit text".into()),
            template: Some("templated".into()),
            ..Default::default()
        };
        let msg = build_system_message(&config, &[]).await.unwrap();
        assert_eq!(msg.content.extract_all_text(), "explicit text");
    }

    #[tokio::test]
    async fn template_used_when_no_text_or_path() {
        let config = PromptConfig { template: Some("templated".into()), ..Default::default() };
        let msg = build_system_message(&config, &[]).await.unwrap();
        assert_eq!(msg.content.extract_all_text(), "templated");
    }

    #[tokio::test]
    async fn skills_list_appended_when_enabled() {
        let config = PromptConfig { include_skills_list: true, ..Default::default() };
        let msg = build_system_message(&config, &["demo".into(), "ops:tools".into()]).await.unwrap();
        let text = msg.content.extract_all_text();
        assert!(text.contains("demo"));
        assert!(text.contains("ops:tools"));
    }

    #[tokio::test]
    async fn no_developer_message_by_default() {
        assert!(build_developer_message(&PromptConfig::default()).await.unwrap().is_none());
    }

    #[test]
    fn cap_history_keeps_system_prefix_and_tail() {
        let mut history = vec![Message::system("sys")];
        for i in 0..20 {
            history.push(Message::user(format!("m{i}")));
        }
        let capped = cap_history(history, 5, 100_000);
        assert_eq!(capped.len(), 5);
        assert_eq!(capped[0].content.extract_all_text(), "sys");
        assert_eq!(capped.last().unwrap().content.extract_all_text(), "m19");
    }

    #[test]
    fn cap_history_under_limit_is_untouched() {
        let history = vec![Message::system("sys"), Message::user("hello")];
        let capped = cap_history(history.clone(), 10, 100_000);
        assert_eq!(capped.len(), history.len());
    }

    #[test]
    fn cap_history_enforces_char_budget() {
        let mut history = vec![Message::system("sys")];
        for _ in 0..10 {
            history.push(Message::user("x".repeat(1000)));
        }
        let capped = cap_history(history, 8, 2500);
        let total: usize = capped.iter().map(|m| m.content.extract_all_text().len()).sum();
        assert!(total <= 2500 + 1000, "dropped down toward the char budget, total={total}");
    }
}
