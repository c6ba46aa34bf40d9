//! JSON output styles for published events.

use std::{fmt, io};

use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, PrettyFormatter, Serializer};

use crate::print_warn;

/// How event payloads are laid out on the wire. Key order is preserved in
/// every style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JsonStyle {
    /// Multi-line, three spaces per level.
    #[default]
    Indented,
    /// One line, `", "` between members and `": "` after keys.
    Plain,
    /// No whitespace at all.
    Compact,
}

impl JsonStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            JsonStyle::Indented => "indented",
            JsonStyle::Plain => "plain",
            JsonStyle::Compact => "compact",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "indented" => Some(JsonStyle::Indented),
            "plain" => Some(JsonStyle::Plain),
            "compact" => Some(JsonStyle::Compact),
            _ => None,
        }
    }

    pub fn to_vec<T: Serialize + ?Sized>(self, value: &T) -> serde_json::Result<Vec<u8>> {
        match self {
            JsonStyle::Indented => write_with(value, PrettyFormatter::with_indent(b"   ")),
            JsonStyle::Plain => write_with(value, PlainFormatter),
            JsonStyle::Compact => serde_json::to_vec(value),
        }
    }
}

impl From<String> for JsonStyle {
    fn from(value: String) -> Self {
        JsonStyle::parse(&value).unwrap_or_else(|| {
            print_warn!("Unsupported JSON format option '{}', using default (indented)", value);
            JsonStyle::Indented
        })
    }
}

impl From<JsonStyle> for String {
    fn from(style: JsonStyle) -> Self {
        style.as_str().to_string()
    }
}

impl fmt::Display for JsonStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn write_with<T, F>(value: &T, formatter: F) -> serde_json::Result<Vec<u8>>
where
    T: Serialize + ?Sized,
    F: Formatter,
{
    let mut buf = Vec::with_capacity(256);
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Single line with a space after every separator.
struct PlainFormatter;

impl Formatter for PlainFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::core::record::EventRecord;

    fn sample() -> EventRecord {
        EventRecord::from_value(json!({
            "type": 2,
            "timestamp": 1000,
            "session_id": 7,
            "event": {"name": "attached", "opaque": [1, 2]}
        }))
        .unwrap()
    }

    #[test]
    fn test_compact() {
        let out = JsonStyle::Compact.to_vec(&sample()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{"type":2,"timestamp":1000,"session_id":7,"event":{"name":"attached","opaque":[1,2]}}"#
        );
    }

    #[test]
    fn test_plain() {
        let out = JsonStyle::Plain.to_vec(&sample()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{"type": 2, "timestamp": 1000, "session_id": 7, "event": {"name": "attached", "opaque": [1, 2]}}"#
        );
    }

    #[test]
    fn test_indented_uses_three_spaces() {
        let out = String::from_utf8(JsonStyle::Indented.to_vec(&sample()).unwrap()).unwrap();

        assert!(out.starts_with("{\n   \"type\": 2,\n"));
        assert!(out.contains("\n      \"name\": \"attached\""));
        assert!(out.ends_with('}'));
    }

    #[test]
    fn test_styles_parse_back_to_same_content() {
        let expected = serde_json::to_value(sample()).unwrap();

        for style in [JsonStyle::Indented, JsonStyle::Plain, JsonStyle::Compact] {
            let out = style.to_vec(&sample()).unwrap();
            let parsed: Value = serde_json::from_slice(&out).unwrap();
            assert_eq!(parsed, expected, "style {style}");

            let keys: Vec<_> = parsed.as_object().unwrap().keys().cloned().collect();
            assert_eq!(keys, vec!["type", "timestamp", "session_id", "event"]);
        }
    }

    #[test]
    fn test_style_from_config_string() {
        assert_eq!(JsonStyle::from("plain".to_string()), JsonStyle::Plain);
        assert_eq!(JsonStyle::from("COMPACT".to_string()), JsonStyle::Compact);
        assert_eq!(JsonStyle::from("fancy".to_string()), JsonStyle::Indented);
        assert_eq!(String::from(JsonStyle::Plain), "plain");
    }
}
