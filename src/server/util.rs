use serde_json::Value;

// Key masking for log lines
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let start: String = chars[..4].iter().collect();
    let end: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", start, end)
}

/// 日志用的 JSON 摘要；内联图片等大字段只保留前 `max_chars` 个字符
pub fn summarize_json(value: &Value, max_chars: usize) -> String {
    let text = value.to_string();
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text,
    }
}

// Path ids are forwarded into upstream URLs
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 256
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_keys() {
        assert_eq!(mask_key("sk-abcdefgh12345678"), "sk-a****5678");
        assert_eq!(mask_key("short"), "****");
    }

    #[test]
    fn summaries_are_bounded() {
        let v = json!({"input": "x".repeat(100)});
        let s = summarize_json(&v, 20);
        assert_eq!(s.chars().count(), 21);
        assert!(s.ends_with('…'));
        assert_eq!(summarize_json(&json!({"a": 1}), 20), "{\"a\":1}");
    }

    #[test]
    fn ids_reject_path_tricks() {
        assert!(is_valid_id("resp_abc-123"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../files"));
        assert!(!is_valid_id("resp 1"));
        assert!(!is_valid_id("a/b"));
    }
}
