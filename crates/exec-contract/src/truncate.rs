/// Default per-stream tail cap before the combined cap is applied.
pub const DEFAULT_PER_STREAM_CAP: usize = 64 * 1024;
/// Default combined cap across both streams, preferring stderr.
pub const DEFAULT_COMBINED_CAP: usize = 128 * 1024;

pub struct TruncatedOutput {
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

fn tail(s: &str, cap: usize) -> (String, bool) {
    if s.len() <= cap {
        return (s.to_string(), false);
    }
    let mut start = s.len() - cap;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    (s[start..].to_string(), true)
}

/// Apply the per-stream cap, then the combined cap, keeping as much of
/// stderr as possible when the combined cap forces a cut.
pub fn truncate_output(stdout: &str, stderr: &str, per_stream_cap: usize, combined_cap: usize) -> TruncatedOutput {
    let (mut stdout_t, stdout_truncated) = tail(stdout, per_stream_cap);
    let (mut stderr_t, stderr_truncated) = tail(stderr, per_stream_cap);
    let mut truncated = stdout_truncated || stderr_truncated;

    if stdout_t.len() + stderr_t.len() > combined_cap {
        truncated = true;
        if stderr_t.len() >= combined_cap {
            let (s, _) = tail(&stderr_t, combined_cap);
            stderr_t = s;
            stdout_t.clear();
        } else {
            let stdout_budget = combined_cap - stderr_t.len();
            let (s, _) = tail(&stdout_t, stdout_budget);
            stdout_t = s;
        }
    }

    TruncatedOutput { stdout: stdout_t, stderr: stderr_t, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_cap_is_untouched() {
        let out = truncate_output("small", "also small", 1024, 2048);
        assert_eq!(out.stdout, "small");
        assert_eq!(out.stderr, "also small");
        assert!(!out.truncated);
    }

    #[test]
    fn per_stream_cap_keeps_tail() {
        let big = "a".repeat(100);
        let out = truncate_output(&big, "", 10, 1024);
        assert_eq!(out.stdout.len(), 10);
        assert!(out.truncated);
    }

    #[test]
    fn combined_cap_prefers_stderr() {
        let stdout = "o".repeat(100);
        let stderr = "e".repeat(100);
        let out = truncate_output(&stdout, &stderr, 1024, 120);
        assert_eq!(out.stderr.len(), 100);
        assert_eq!(out.stdout.len(), 20);
        assert!(out.truncated);
    }

    #[test]
    fn stderr_alone_exceeding_combined_cap_drops_stdout_entirely() {
        let stdout = "o".repeat(50);
        let stderr = "e".repeat(200);
        let out = truncate_output(&stdout, &stderr, 1024, 100);
        assert_eq!(out.stderr.len(), 100);
        assert!(out.stdout.is_empty());
    }
}
