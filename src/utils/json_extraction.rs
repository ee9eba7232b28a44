//! JSON extraction from LLM responses.
//!
//! The need extraction stage asks the model for JSON only, but real
//! responses still arrive wrapped in markdown fences or preceded by prose.
//! Extraction tries the following strategies in order:
//! 1. JSON in a ```json code block
//! 2. JSON in a generic code block
//! 3. Direct JSON (content starts with '{')
//! 4. First JSON object anywhere in the content via brace matching

use regex::Regex;

/// Extract a JSON object from an LLM response that may be wrapped in
/// markdown or explanatory text.
///
/// Returns the extracted JSON string, or the trimmed original content if no
/// candidate was found (the caller's serde parse reports the real error).
pub fn extract_json_from_response(content: &str) -> String {
    let trimmed = content.trim();

    if let Some(json) = extract_from_json_code_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json).is_ok() {
            return json;
        }
    }

    if let Some(json) = extract_from_generic_code_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json).is_ok() {
            return json;
        }
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return candidate.to_string();
            }
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = find_matching_brace(&trimmed[start..]) {
            let candidate = &trimmed[start..=start + end];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return candidate.to_string();
            }
        }
    }

    trimmed.to_string()
}

/// Find the index of the matching closing '}' for a string starting with '{'.
///
/// Handles nested braces, string literals and escape sequences.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extract JSON from a ```json ... ``` code block.
fn extract_from_json_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    let json_content = caps.get(1)?.as_str().trim();
    if json_content.starts_with('{') {
        if let Some(end) = find_matching_brace(json_content) {
            return Some(json_content[..=end].to_string());
        }
        return Some(json_content.to_string());
    }
    None
}

/// Extract JSON from a generic ``` ... ``` code block.
fn extract_from_generic_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    let block_content = caps.get(1)?.as_str().trim();
    let start = block_content.find('{')?;
    let end = find_matching_brace(&block_content[start..])?;
    Some(block_content[start..=start + end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_json() {
        let content = r#"{"needs": []}"#;
        assert_eq!(extract_json_from_response(content), content);
    }

    #[test]
    fn test_json_code_block() {
        let content = "Here you go:\n```json\n{\"needs\": [1, 2]}\n```\nDone.";
        assert_eq!(extract_json_from_response(content), "{\"needs\": [1, 2]}");
    }

    #[test]
    fn test_generic_code_block() {
        let content = "```\n{\"needs\": []}\n```";
        assert_eq!(extract_json_from_response(content), "{\"needs\": []}");
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let content = "The extracted needs are {\"needs\": [{\"category\": \"Usability\"}]} as requested.";
        assert_eq!(
            extract_json_from_response(content),
            "{\"needs\": [{\"category\": \"Usability\"}]}"
        );
    }

    #[test]
    fn test_no_json_returns_trimmed_content() {
        let content = "  I could not produce any needs.  ";
        assert_eq!(
            extract_json_from_response(content),
            "I could not produce any needs."
        );
    }

    #[test]
    fn test_find_matching_brace_nested() {
        let s = r#"{"a": {"b": 1}, "c": "}"}"#;
        assert_eq!(find_matching_brace(s), Some(s.len() - 1));
    }

    #[test]
    fn test_find_matching_brace_escaped_quote() {
        let s = r#"{"a": "quote \" brace }"}"#;
        assert_eq!(find_matching_brace(s), Some(s.len() - 1));
    }

    #[test]
    fn test_find_matching_brace_unclosed() {
        assert_eq!(find_matching_brace(r#"{"a": 1"#), None);
    }
}
