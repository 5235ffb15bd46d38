//! Output formatters for command results and change events.

use chrono::{DateTime, SecondsFormat};
use clap::ValueEnum;
use kvstore_client::SetResult;
use kvstore_proto::ChangeEvent;

/// Separator printed before each event in text output.
const EVENT_SEPARATOR: &str = "─────────────────────────────────────────";

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Informational line such as the connection banner. `None` suppresses it.
    fn format_notice(&self, message: &str) -> Option<String>;

    /// Format the result of a get.
    fn format_get(&self, key: &str, value: Option<&str>) -> String;

    /// Format the result of a set.
    fn format_set(&self, key: &str, value: &str, result: &SetResult) -> String;

    /// Format one received change event.
    fn format_event(&self, event: &ChangeEvent) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Render a millisecond timestamp as RFC 3339 in UTC.
pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| timestamp_ms.to_string())
}

/// Plain text formatter.
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_notice(&self, message: &str) -> Option<String> {
        Some(message.to_string())
    }

    fn format_get(&self, key: &str, value: Option<&str>) -> String {
        match value {
            Some(value) => format!("Key found\n  Key:   {}\n  Value: {}", key, value),
            None => format!("Key not found: {}", key),
        }
    }

    fn format_set(&self, key: &str, value: &str, result: &SetResult) -> String {
        if result.success {
            format!(
                "Key stored successfully\n  Key:   {}\n  Value: {}\n  Message: {}",
                key, value, result.message
            )
        } else {
            format!("Set failed: {}", result.message)
        }
    }

    fn format_event(&self, event: &ChangeEvent) -> String {
        format!(
            "{}\nEvent: {}\n  Key:       {}\n  Value:     {}\n  Timestamp: {}\n",
            EVENT_SEPARATOR,
            event.change_type,
            event.key,
            event.value,
            format_timestamp(event.timestamp_ms)
        )
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_notice(&self, _message: &str) -> Option<String> {
        None
    }

    fn format_get(&self, key: &str, value: Option<&str>) -> String {
        serde_json::json!({
            "key": key,
            "found": value.is_some(),
            "value": value,
        })
        .to_string()
    }

    fn format_set(&self, key: &str, value: &str, result: &SetResult) -> String {
        serde_json::json!({
            "key": key,
            "value": value,
            "success": result.success,
            "message": result.message,
        })
        .to_string()
    }

    fn format_event(&self, event: &ChangeEvent) -> String {
        serde_json::json!({
            "change_type": event.change_type.as_str(),
            "key": event.key,
            "value": event.value,
            "timestamp": format_timestamp(event.timestamp_ms),
            "timestamp_ms": event.timestamp_ms,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ChangeEvent {
        ChangeEvent::set("user:123", "Alice", 1_700_000_000_000)
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_700_000_000_000), "2023-11-14T22:13:20Z");
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_text_get() {
        let f = TextFormatter;
        assert_eq!(
            f.format_get("user:123", Some("Alice")),
            "Key found\n  Key:   user:123\n  Value: Alice"
        );
        assert_eq!(f.format_get("nope", None), "Key not found: nope");
    }

    #[test]
    fn test_text_set() {
        let f = TextFormatter;
        let ok = SetResult {
            success: true,
            message: "key stored successfully".to_string(),
        };
        let output = f.format_set("user:123", "Alice", &ok);
        assert!(output.starts_with("Key stored successfully\n"));
        assert!(output.ends_with("  Message: key stored successfully"));

        let failed = SetResult {
            success: false,
            message: "nope".to_string(),
        };
        assert_eq!(f.format_set("k", "v", &failed), "Set failed: nope");
    }

    #[test]
    fn test_text_event() {
        let output = TextFormatter.format_event(&event());
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], EVENT_SEPARATOR);
        assert_eq!(lines[1], "Event: SET");
        assert_eq!(lines[2], "  Key:       user:123");
        assert_eq!(lines[3], "  Value:     Alice");
        assert_eq!(lines[4], "  Timestamp: 2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_json_output() {
        let f = JsonFormatter;
        assert!(f.format_notice("Connected").is_none());

        let get: serde_json::Value = serde_json::from_str(&f.format_get("k", None)).unwrap();
        assert_eq!(get["found"], false);
        assert!(get["value"].is_null());

        let ev: serde_json::Value = serde_json::from_str(&f.format_event(&event())).unwrap();
        assert_eq!(ev["change_type"], "SET");
        assert_eq!(ev["key"], "user:123");
        assert_eq!(ev["timestamp_ms"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Text.to_string(), "text");
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }
}
