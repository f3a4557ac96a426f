use sa_engine_domain::{Message, Role};

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn format_message(msg: &Message) -> String {
    format!("{}: {}", role_label(msg.role), msg.content.extract_all_text())
}

/// Split `history` into the prefix to summarize and the tail of up to
/// `keep_last` messages to carry forward verbatim, so rebuilt history is
/// the summary followed by the last K messages.
pub fn split_for_compaction(history: &[Message], keep_last: usize) -> (&[Message], &[Message]) {
    if history.len() <= keep_last {
        (&[], history)
    } else {
        let boundary = history.len() - keep_last;
        (&history[..boundary], &history[boundary..])
    }
}

/// Render the prefix to summarize as plain text, bounded to
/// `max_chars` by dropping the oldest lines first — the summarizer sees
/// whatever will fit, biased toward the most recent context.
pub fn format_transcript(messages: &[Message], max_chars: usize) -> String {
    let lines: Vec<String> = messages.iter().map(format_message).collect();
    let mut joined = lines.join("\n");
    if joined.len() > max_chars {
        let start = joined.len() - max_chars;
        // Avoid splitting a UTF-8 char boundary.
        let mut start = start;
        while start < joined.len() && !joined.is_char_boundary(start) {
            start += 1;
        }
        joined = joined[start..].to_string();
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("message {i}"))).collect()
    }

    #[test]
    fn split_keeps_last_k_and_summarizes_rest() {
        let history = msgs(10);
        let (to_summarize, kept) = split_for_compaction(&history, 3);
        assert_eq!(to_summarize.len(), 7);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn split_with_short_history_summarizes_nothing() {
        let history = msgs(2);
        let (to_summarize, kept) = split_for_compaction(&history, 6);
        assert_eq!(to_summarize.len(), 0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn format_transcript_bounds_by_max_chars() {
        let history = msgs(100);
        let out = format_transcript(&history, 50);
        assert!(out.len() <= 50);
    }

    #[test]
    fn format_transcript_keeps_whole_text_under_limit() {
        let history = msgs(2);
        let out = format_transcript(&history, 10_000);
        assert!(out.contains("message 0"));
        assert!(out.contains("message 1"));
    }
}
