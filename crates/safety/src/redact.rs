use sha2::{Digest, Sha256};
use serde_json::{json, Value};

/// Replace any occurrence of a known secret value (length >= 4) in `text`
/// with `<redacted>`. Used for both event sanitization and tool-result
/// post-processing.
pub fn redact_text(text: &str, known_secrets: &[String]) -> String {
    let mut out = text.to_string();
    for secret in known_secrets {
        if secret.len() >= 4 && out.contains(secret.as_str()) {
            out = out.replace(secret.as_str(), "<redacted>");
        }
    }
    out
}

/// Apply the full args-sanitization pipeline before an args object reaches
/// the WAL or an approval request: `env` objects collapse to their sorted
/// key list, `file_write.content` collapses to a byte-count + sha256
/// envelope, and remaining string fields go through `redact_text`.
pub fn sanitize_args(tool_name: &str, args: &Value, known_secrets: &[String]) -> Value {
    let mut sanitized = args.clone();
    if let Some(obj) = sanitized.as_object_mut() {
        if let Some(env) = obj.get("env").and_then(|v| v.as_object()) {
            let mut keys: Vec<String> = env.keys().cloned().collect();
            keys.sort();
            obj.insert("env".into(), json!({ "env_keys": keys }));
        }
        if tool_name == "file_write" {
            if let Some(content) = obj.get("content").and_then(|v| v.as_str()) {
                let bytes = content.len();
                let mut hasher = Sha256::new();
                hasher.update(content.as_bytes());
                let sha = hex::encode(hasher.finalize());
                obj.insert("content".into(), json!({ "bytes": bytes, "content_sha256": sha }));
            }
        }
        for (key, value) in obj.iter_mut() {
            if key == "env" || key == "content" {
                continue;
            }
            if let Some(s) = value.as_str() {
                let redacted = redact_text(s, known_secrets);
                if redacted != s {
                    *value = Value::String(redacted);
                }
            }
        }
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_object_collapses_to_keys_only() {
        let args = json!({"env": {"API_KEY": "sk-secret", "DEBUG": "1"}});
        let sanitized = sanitize_args("shell_exec", &args, &[]);
        let keys = sanitized["env"]["env_keys"].as_array().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(sanitized["env"].get("API_KEY").is_none());
    }

    #[test]
    fn file_write_content_collapses_to_hash_envelope() {
        let args = json!({"path": "a.txt", "content": "hello"});
        let sanitized = sanitize_args("file_write", &args, &[]);
        assert_eq!(sanitized["content"]["bytes"], 5);
        assert_eq!(sanitized["content"]["content_sha256"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn known_secret_values_are_redacted() {
        let args = json!({"message": "token is sk-abcdefg12345"});
        let sanitized = sanitize_args("shell_exec", &args, &["sk-abcdefg12345".to_string()]);
        assert_eq!(sanitized["message"], "token is <redacted>");
    }

    #[test]
    fn short_values_are_not_redacted() {
        let args = json!({"flag": "-v"});
        let sanitized = sanitize_args("shell_exec", &args, &["-v".to_string()]);
        assert_eq!(sanitized["flag"], "-v");
    }
}
