//! Decoded upstream records and the predicate deciding which ones to keep.

use std::collections::HashSet;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One upstream record.
///
/// Keeps the original JSON text alongside the decoded tree: the tree is what
/// the filter and keyword matching look at, the text is what subscribers are
/// handed, so fields this gateway never inspects survive verbatim.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    raw: String,
    value: Value,
}

impl StreamEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, EventParseError> {
        let raw = std::str::from_utf8(payload)?;
        let value = serde_json::from_str(raw)?;
        Ok(StreamEvent {
            raw: raw.to_owned(),
            value,
        })
    }

    /// The record exactly as the upstream sent it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Status updates carry an `in_reply_to_status_id` key (often null);
    /// deletes, warnings and other control records do not.
    pub fn is_status(&self) -> bool {
        self.value.get("in_reply_to_status_id").is_some()
    }

    pub fn lang(&self) -> Option<&str> {
        self.value.get("lang").and_then(Value::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.value.get("text").and_then(Value::as_str)
    }
}

/// Language/status predicate applied to every decoded record before fan-out.
#[derive(Debug, Clone)]
pub struct EventFilter {
    allowed_langs: HashSet<String>,
}

impl EventFilter {
    pub fn new(languages: impl IntoIterator<Item = String>) -> Self {
        EventFilter {
            allowed_langs: languages.into_iter().collect(),
        }
    }

    /// An event passes iff it is a status update in an allowed language.
    pub fn passes(&self, event: &StreamEvent) -> bool {
        event.is_status()
            && event
                .lang()
                .is_some_and(|lang| self.allowed_langs.contains(lang))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> StreamEvent {
        StreamEvent::parse(json.as_bytes()).unwrap()
    }

    fn filter() -> EventFilter {
        EventFilter::new(["en".to_owned(), "no".to_owned()])
    }

    #[test]
    fn status_in_allowed_language_passes() {
        let ev = event(r#"{"in_reply_to_status_id":null,"lang":"en","text":"hi"}"#);
        assert!(filter().passes(&ev));
    }

    #[test]
    fn null_reply_id_still_counts_as_status() {
        let ev = event(r#"{"in_reply_to_status_id":null,"lang":"no","text":"hei"}"#);
        assert!(ev.is_status());
        assert!(filter().passes(&ev));
    }

    #[test]
    fn records_without_reply_id_are_not_statuses() {
        let ev = event(r#"{"delete":{"status":{"id":1}},"lang":"en"}"#);
        assert!(!ev.is_status());
        assert!(!filter().passes(&ev));
    }

    #[test]
    fn disallowed_or_missing_language_is_dropped() {
        let fr = event(r#"{"in_reply_to_status_id":1,"lang":"fr","text":"salut"}"#);
        assert!(!filter().passes(&fr));
        let none = event(r#"{"in_reply_to_status_id":1,"text":"hi"}"#);
        assert!(!filter().passes(&none));
    }

    #[test]
    fn raw_text_is_preserved_verbatim() {
        let json = r#"{"in_reply_to_status_id": null, "lang":"en", "extra": [1, 2]}"#;
        assert_eq!(event(json).raw(), json);
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert!(matches!(
            StreamEvent::parse(b"{not json"),
            Err(EventParseError::Json(_))
        ));
        assert!(matches!(
            StreamEvent::parse(&[0xff, 0xfe]),
            Err(EventParseError::Utf8(_))
        ));
    }
}
