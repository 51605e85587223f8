use crate::llm::ProviderGateway;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Malformed text handed to the repair prompt is capped at this many chars.
const REPAIR_INPUT_MAX_CHARS: usize = 2000;
const LOG_PREVIEW_CHARS: usize = 200;

/// Strips a leading ```json / ``` fence and a trailing ``` fence.
pub fn strip_code_fences(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

/// Direct parse, then greedy bracket extraction with trailing-comma cleanup.
/// Pure text-to-data; no provider involved.
pub fn parse_lenient(raw: &str) -> Option<Value> {
    let cleaned = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str(cleaned) {
        return Some(value);
    }

    // Array pattern first: meal batches are arrays.
    for re in [array_span_re(), object_span_re()] {
        let Some(m) = re.find(cleaned) else { continue };
        let candidate = strip_trailing_commas(m.as_str());
        match serde_json::from_str(&candidate) {
            Ok(value) => return Some(value),
            Err(err) => {
                tracing::warn!(error = %err, candidate = %preview(&candidate), "bracket extraction parse failed");
            }
        }
    }

    None
}

/// Full parse ladder: lenient parse, then a single AI-assisted repair attempt
/// through the gateway. Never errors; exhaustion yields `None`.
pub async fn parse_with_repair(
    gateway: &dyn ProviderGateway,
    raw: &str,
    context: &str,
) -> Option<Value> {
    if let Some(value) = parse_lenient(raw) {
        return Some(value);
    }

    tracing::warn!(context, response = %preview(raw), "could not parse AI response; attempting AI-assisted repair");
    repair_with_ai(gateway, raw, context).await
}

async fn repair_with_ai(
    gateway: &dyn ProviderGateway,
    malformed: &str,
    context: &str,
) -> Option<Value> {
    let truncated: String = malformed.chars().take(REPAIR_INPUT_MAX_CHARS).collect();
    let reply = gateway.query(&repair_prompt(&truncated), None).await?;
    let cleaned = strip_code_fences(&reply);

    match serde_json::from_str(cleaned) {
        Ok(value) => {
            tracing::info!(context, "AI-assisted JSON repair succeeded");
            Some(value)
        }
        Err(err) => {
            tracing::error!(context, error = %err, repaired = %preview(cleaned), "AI-assisted JSON repair still invalid");
            None
        }
    }
}

fn repair_prompt(truncated: &str) -> String {
    format!(
        "I have a malformed JSON response that needs to be fixed. Please parse and correct this JSON:\n\
         \n\
         Malformed Response:\n\
         {truncated}\n\
         \n\
         Instructions:\n\
         1. Extract the valid JSON structure from the response\n\
         2. Fix any syntax errors (missing commas, quotes, brackets, etc.)\n\
         3. Ensure the JSON is valid and complete\n\
         4. Return ONLY the corrected JSON, no additional text or explanation\n\
         \n\
         The response should be either:\n\
         - A valid JSON array [...] if it's a list of items\n\
         - A valid JSON object {{...}} if it's a single object\n\
         \n\
         IMPORTANT: Return ONLY the JSON, nothing else."
    )
}

fn strip_trailing_commas(s: &str) -> String {
    trailing_comma_re().replace_all(s, "$1").into_owned()
}

fn array_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[.*\]").expect("valid array span pattern"))
}

fn object_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid object span pattern"))
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma pattern"))
}

fn preview(s: &str) -> String {
    s.chars().take(LOG_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedGateway {
        replies: Mutex<VecDeque<Option<String>>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<Option<&str>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProviderGateway for ScriptedGateway {
        fn provider(&self) -> Provider {
            Provider::Ollama
        }

        async fn query(&self, _prompt: &str, _model_override: Option<&str>) -> Option<String> {
            self.replies.lock().unwrap().pop_front().flatten()
        }
    }

    #[test]
    fn fenced_array_parses_same_as_unwrapped() {
        let body = r#"[{"name": "Oatmeal", "calories": 300}]"#;
        let fenced = format!("```json\n{body}\n```");
        assert_eq!(parse_lenient(&fenced), parse_lenient(body));
        assert_eq!(parse_lenient(body), Some(json!([{"name": "Oatmeal", "calories": 300}])));
    }

    #[test]
    fn bare_fence_without_language_tag() {
        let fenced = "```\n{\"a\": 1}\n```";
        assert_eq!(parse_lenient(fenced), Some(json!({"a": 1})));
    }

    #[test]
    fn trailing_comma_before_bracket_is_repaired() {
        let with_comma = r#"[{"name": "A"}, {"name": "B"},]"#;
        let without = r#"[{"name": "A"}, {"name": "B"}]"#;
        assert_eq!(parse_lenient(with_comma), parse_lenient(without));
        assert!(parse_lenient(with_comma).is_some());
    }

    #[test]
    fn trailing_comma_before_brace_is_repaired() {
        let with_comma = r#"{"ingredients": ["x"], "instructions": ["y"],}"#;
        assert_eq!(
            parse_lenient(with_comma),
            Some(json!({"ingredients": ["x"], "instructions": ["y"]}))
        );
    }

    #[test]
    fn extracts_array_embedded_in_prose() {
        let text = "Here are your meals:\n[\"a\", \"b\"]\nEnjoy!";
        assert_eq!(parse_lenient(text), Some(json!(["a", "b"])));
    }

    #[test]
    fn extracts_object_when_no_array_present() {
        let text = "Sure! {\"servings\": 2} hope that helps";
        assert_eq!(parse_lenient(text), Some(json!({"servings": 2})));
    }

    #[test]
    fn array_span_takes_precedence_over_object_span() {
        // Meal batches are arrays, so the array pattern is tried first even
        // when an object also appears in the text.
        let text = "note {\"kind\": \"meta\"} and data [1, 2]";
        assert_eq!(parse_lenient(text), Some(json!([1, 2])));
    }

    #[test]
    fn hopeless_text_yields_none() {
        assert_eq!(parse_lenient("no json here at all"), None);
    }

    #[tokio::test]
    async fn repair_round_trip_through_gateway() {
        let gateway = ScriptedGateway::new(vec![Some("```json\n[\"fixed\"]\n```")]);
        let value = parse_with_repair(&gateway, "meals: [\"broken\"", "test batch").await;
        assert_eq!(value, Some(json!(["fixed"])));
    }

    #[tokio::test]
    async fn repair_failure_yields_none() {
        // Gateway answers, but the "repaired" text is still not JSON.
        let gateway = ScriptedGateway::new(vec![Some("still broken")]);
        assert_eq!(parse_with_repair(&gateway, "argh {", "test").await, None);

        // Gateway itself fails.
        let gateway = ScriptedGateway::new(vec![None]);
        assert_eq!(parse_with_repair(&gateway, "argh {", "test").await, None);
    }

    #[tokio::test]
    async fn parse_with_repair_skips_gateway_on_clean_input() {
        // No scripted replies: any gateway call would return None and the
        // assertion below would fail if the repair path ran.
        let gateway = ScriptedGateway::new(vec![]);
        let value = parse_with_repair(&gateway, "[1, 2, 3]", "test").await;
        assert_eq!(value, Some(json!([1, 2, 3])));
    }
}
