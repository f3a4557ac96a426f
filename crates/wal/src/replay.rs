use std::path::Path;

use sa_engine_domain::Event;

/// Result of replaying a `events.jsonl` file: the successfully parsed
/// events in order, plus a count of lines that failed to parse. Invalid
/// lines are skipped and counted, never fatal.
#[derive(Debug, Default)]
pub struct ReplayResult {
    pub events: Vec<Event>,
    pub invalid_wal: u64,
}

/// Replay a list of raw JSONL lines into events. Used by both file-backed
/// and in-memory backends via `WalBackend::read_all`.
pub fn replay_lines(lines: &[String]) -> ReplayResult {
    let mut result = ReplayResult::default();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(event) => result.events.push(event),
            Err(e) => {
                tracing::warn!(error = %e, "skipping invalid WAL line during replay");
                result.invalid_wal += 1;
            }
        }
    }
    result
}

/// Copy the first `up_to_index_inclusive + 1` lines of `src_events_path`
/// into `dst_events_path`, creating the destination's parent directory.
/// The caller is responsible for emitting the resuming run's
/// `run_started { resume: { enabled: true, strategy, previous_events } }`.
pub fn fork_run(src_events_path: &Path, dst_events_path: &Path, up_to_index_inclusive: usize) -> std::io::Result<u64> {
    let raw = std::fs::read_to_string(src_events_path)?;
    let lines: Vec<&str> = raw.lines().collect();
    let take = (up_to_index_inclusive + 1).min(lines.len());
    if let Some(parent) = dst_events_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = String::new();
    for line in &lines[..take] {
        buf.push_str(line);
        buf.push('\n');
    }
    std::fs::write(dst_events_path, buf)?;
    Ok(take as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_engine_domain::event::{EventKind, RunCancelledPayload};

    fn sample_line(run_id: &str) -> String {
        let ev = Event::new(run_id, EventKind::RunCancelled(RunCancelledPayload { message: "m".into(), wal_locator: "l".into() }));
        serde_json::to_string(&ev).unwrap()
    }

    #[test]
    fn replay_skips_invalid_lines_and_counts_them() {
        let lines = vec![sample_line("r1"), "not json".to_string(), sample_line("r1")];
        let result = replay_lines(&lines);
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.invalid_wal, 1);
    }

    #[test]
    fn replay_ignores_blank_lines() {
        let lines = vec![sample_line("r1"), "".to_string(), "   ".to_string()];
        let result = replay_lines(&lines);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.invalid_wal, 0);
    }

    #[test]
    fn fork_run_copies_prefix_only() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src/events.jsonl");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        let all_lines: Vec<String> = (0..5).map(|_| sample_line("r1")).collect();
        std::fs::write(&src, all_lines.join("\n") + "\n").unwrap();

        let dst = dir.path().join("dst/events.jsonl");
        let copied = fork_run(&src, &dst, 2).unwrap();
        assert_eq!(copied, 3);
        let dst_raw = std::fs::read_to_string(&dst).unwrap();
        assert_eq!(dst_raw.lines().count(), 3);
    }

    #[test]
    fn fork_run_clamps_to_available_lines() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src/events.jsonl");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, sample_line("r1") + "\n").unwrap();

        let dst = dir.path().join("dst/events.jsonl");
        let copied = fork_run(&src, &dst, 99).unwrap();
        assert_eq!(copied, 1);
    }
}
