//! LLM output sanitization: strip fences, drop trailing commas, and
//! close truncated braces/brackets before handing the text to `serde_json`
//! (spec §4.4 step 3, §9's sanitizer pipeline).

/// Strip a ```json ... ``` or bare ``` ... ``` fence, if present.
/// Falls back to the raw text so a fence-free response still parses.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    for marker in ["```json", "```JSON", "```"] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            let rest = rest.trim_start();
            if let Some(end) = rest.rfind("```") {
                return rest[..end].trim();
            }
            return rest.trim();
        }
    }
    trimmed
}

/// Remove a trailing comma immediately before a closing `}` or `]`,
/// which models reliably produce when truncated mid-array. Tracks
/// string-literal context the same way `close_unterminated` does, so a
/// `,}`/`,]` substring quoted inside an explanation string is left alone.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut in_string = false;
    let mut escaped = false;
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Append whatever closing braces/brackets are missing, counting
/// unescaped delimiters outside string literals so content never gets
/// mistaken for structure.
pub fn close_unterminated(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Run the full sanitizer pipeline over a raw LLM response.
pub fn sanitize(raw: &str) -> String {
    let fenced = strip_fences(raw);
    let no_trailing_commas = strip_trailing_commas(fenced);
    close_unterminated(&no_trailing_commas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"pois\": []}\n```";
        assert_eq!(strip_fences(raw), "{\"pois\": []}");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        assert_eq!(strip_fences("{\"pois\": []}"), "{\"pois\": []}");
    }

    #[test]
    fn drops_trailing_comma_before_brace() {
        assert_eq!(strip_trailing_commas("{\"a\": 1,}"), "{\"a\": 1}");
    }

    #[test]
    fn drops_trailing_comma_before_bracket() {
        assert_eq!(strip_trailing_commas("[1, 2,]"), "[1, 2]");
    }

    #[test]
    fn ignores_commas_inside_strings() {
        assert_eq!(strip_trailing_commas("{\"a\": \"x,\"}"), "{\"a\": \"x,\"}");
    }

    #[test]
    fn leaves_literal_comma_brace_sequence_inside_a_string_intact() {
        let raw = r#"{"explanation": "looks like {x: 1,}", "a": 1}"#;
        let sanitized = strip_trailing_commas(raw);
        assert_eq!(sanitized, raw);
        let parsed: serde_json::Value = serde_json::from_str(&sanitized).unwrap();
        assert_eq!(parsed["explanation"], "looks like {x: 1,}");
    }

    #[test]
    fn closes_truncated_object_and_array() {
        let truncated = r#"{"pois": [{"name": "a""#;
        let closed = close_unterminated(truncated);
        let parsed: serde_json::Value = serde_json::from_str(&closed).unwrap();
        assert!(parsed["pois"][0]["name"] == "a");
    }

    #[test]
    fn full_pipeline_recovers_truncated_fenced_response() {
        let raw = "```json\n{\"pois\": [{\"name\": \"a\",}";
        let sanitized = sanitize(raw);
        let parsed: serde_json::Value = serde_json::from_str(&sanitized).unwrap();
        assert_eq!(parsed["pois"][0]["name"], "a");
    }
}
