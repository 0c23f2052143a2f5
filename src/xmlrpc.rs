//! Minimal XML-RPC codec for the Trac RPC plugin.
//!
//! Only the subset Trac actually emits is supported: scalars, arrays,
//! structs, `dateTime.iso8601`, `base64` and the `nil` extension.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed XML-RPC document: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("unexpected XML-RPC content: {0}")]
    Unexpected(String),
    #[error("invalid {kind} value {text:?}")]
    InvalidScalar { kind: &'static str, text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    DateTime(DateTime<Utc>),
    Base64(Vec<u8>),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Seconds since the epoch for datetime values; integers are assumed to
    /// already be epoch seconds.
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Value::DateTime(dt) => Some(dt.timestamp()),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_struct(self) -> Option<BTreeMap<String, Value>> {
        match self {
            Value::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Converts to JSON for pass-through export. Datetimes become epoch
    /// seconds and binary payloads become standard base64 text.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::from(i),
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::String(s) => serde_json::Value::String(s),
            Value::Double(d) => serde_json::Number::from_f64(d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::DateTime(dt) => serde_json::Value::from(dt.timestamp()),
            Value::Base64(bytes) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Value::into_json).collect())
            }
            Value::Struct(members) => serde_json::Value::Object(
                members
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
            Value::Nil => serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Fault {}: {}>", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    Success(Value),
    Fault(Fault),
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall>");
    let _ = write!(out, "<methodName>{}</methodName><params>", escape(method));
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            let _ = write!(out, "<int>{}</int>", i);
        }
        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        Value::String(s) => {
            let _ = write!(out, "<string>{}</string>", escape(s.as_str()));
        }
        Value::Double(d) => {
            let _ = write!(out, "<double>{}</double>", d);
        }
        Value::DateTime(dt) => {
            let _ = write!(
                out,
                "<dateTime.iso8601>{}</dateTime.iso8601>",
                dt.format("%Y%m%dT%H:%M:%S")
            );
        }
        Value::Base64(bytes) => {
            let _ = write!(
                out,
                "<base64>{}</base64>",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            );
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                let _ = write!(out, "<member><name>{}</name>", escape(name.as_str()));
                encode_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

pub fn parse_response(text: &str) -> Result<MethodResponse, Error> {
    let mut parser = Parser::new(text);
    parser.expect_open("methodResponse")?;

    let response = match parser.next_tag()? {
        Tag::Open(name) if name == "params" => {
            parser.expect_open("param")?;
            parser.expect_open("value")?;
            let value = parser.value()?;
            parser.expect_close("param")?;
            parser.expect_close("params")?;
            MethodResponse::Success(value)
        }
        Tag::Empty(name) if name == "params" => MethodResponse::Success(Value::Nil),
        Tag::Open(name) if name == "fault" => {
            parser.expect_open("value")?;
            let value = parser.value()?;
            parser.expect_close("fault")?;
            MethodResponse::Fault(fault_from(value)?)
        }
        other => return Err(Error::Unexpected(format!("{:?} in methodResponse", other))),
    };

    parser.expect_close("methodResponse")?;
    Ok(response)
}

fn fault_from(value: Value) -> Result<Fault, Error> {
    let mut members = value
        .into_struct()
        .ok_or_else(|| Error::Unexpected("fault is not a struct".to_string()))?;
    let code = members
        .get("faultCode")
        .and_then(Value::as_i64)
        .unwrap_or_default();
    let message = match members.remove("faultString") {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    Ok(Fault { code, message })
}

pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    for fmt in ["%Y%m%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y%m%dT%H%M%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, PartialEq)]
enum Tag {
    Open(String),
    Empty(String),
    Close(String),
    Eof,
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
}

fn tag_name(raw: &[u8]) -> Result<String, Error> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::Unexpected("non UTF-8 element name".to_string()))
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Parser {
            reader: Reader::from_str(text),
        }
    }

    /// Next structural event. Whitespace, comments, declarations and
    /// processing instructions are dropped.
    fn next_tag(&mut self) -> Result<Tag, Error> {
        loop {
            match self.reader.read_event()? {
                Event::Start(e) => return Ok(Tag::Open(tag_name(e.name().as_ref())?)),
                Event::Empty(e) => return Ok(Tag::Empty(tag_name(e.name().as_ref())?)),
                Event::End(e) => return Ok(Tag::Close(tag_name(e.name().as_ref())?)),
                Event::Text(t) => {
                    let text = t.unescape()?;
                    if !text.trim().is_empty() {
                        return Err(Error::Unexpected(format!("stray text {:?}", text)));
                    }
                }
                Event::CData(_) => {
                    return Err(Error::Unexpected("stray CDATA section".to_string()));
                }
                Event::Eof => return Ok(Tag::Eof),
                _ => {}
            }
        }
    }

    fn expect_open(&mut self, name: &str) -> Result<(), Error> {
        match self.next_tag()? {
            Tag::Open(found) if found == name => Ok(()),
            other => Err(Error::Unexpected(format!(
                "expected <{}>, found {:?}",
                name, other
            ))),
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<(), Error> {
        match self.next_tag()? {
            Tag::Close(found) if found == name => Ok(()),
            other => Err(Error::Unexpected(format!(
                "expected </{}>, found {:?}",
                name, other
            ))),
        }
    }

    /// Character data up to the closing `name` tag.
    fn text(&mut self, name: &str) -> Result<String, Error> {
        let mut text = String::new();
        loop {
            match self.reader.read_event()? {
                Event::Text(t) => text.push_str(&t.unescape()?),
                Event::CData(c) => text.push_str(&cdata_text(&c)?),
                Event::End(e) if e.name().as_ref() == name.as_bytes() => return Ok(text),
                Event::Comment(_) => {}
                Event::Eof => {
                    return Err(Error::Unexpected(format!("end of input inside <{}>", name)))
                }
                other => {
                    return Err(Error::Unexpected(format!(
                        "{:?} inside <{}>",
                        other, name
                    )))
                }
            }
        }
    }

    /// Parses the body of a `<value>` whose start tag was already consumed,
    /// including the closing tag.
    fn value(&mut self) -> Result<Value, Error> {
        let mut text = String::new();
        loop {
            match self.reader.read_event()? {
                Event::Text(t) => text.push_str(&t.unescape()?),
                Event::CData(c) => text.push_str(&cdata_text(&c)?),
                Event::End(e) if e.name().as_ref() == b"value" => {
                    return Ok(Value::String(text));
                }
                Event::Start(e) => {
                    ensure_blank(&text)?;
                    let name = tag_name(e.name().as_ref())?;
                    let value = self.typed(&name)?;
                    self.expect_close("value")?;
                    return Ok(value);
                }
                Event::Empty(e) => {
                    ensure_blank(&text)?;
                    let name = tag_name(e.name().as_ref())?;
                    let value = empty_typed(&name)?;
                    self.expect_close("value")?;
                    return Ok(value);
                }
                Event::Comment(_) => {}
                Event::Eof => {
                    return Err(Error::Unexpected("end of input inside <value>".to_string()))
                }
                other => {
                    return Err(Error::Unexpected(format!("{:?} inside <value>", other)));
                }
            }
        }
    }

    fn typed(&mut self, name: &str) -> Result<Value, Error> {
        match name {
            "int" | "i4" | "i8" => {
                let text = self.text(name)?;
                text.trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| Error::InvalidScalar { kind: "int", text })
            }
            "boolean" => {
                let text = self.text(name)?;
                match text.trim() {
                    "1" => Ok(Value::Bool(true)),
                    "0" => Ok(Value::Bool(false)),
                    _ => Err(Error::InvalidScalar {
                        kind: "boolean",
                        text,
                    }),
                }
            }
            "string" => Ok(Value::String(self.text(name)?)),
            "double" => {
                let text = self.text(name)?;
                text.trim()
                    .parse()
                    .map(Value::Double)
                    .map_err(|_| Error::InvalidScalar {
                        kind: "double",
                        text,
                    })
            }
            "dateTime.iso8601" => {
                let text = self.text(name)?;
                parse_datetime(&text)
                    .map(Value::DateTime)
                    .ok_or(Error::InvalidScalar {
                        kind: "dateTime.iso8601",
                        text,
                    })
            }
            "base64" => {
                let text = self.text(name)?;
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact.as_bytes())
                    .map(Value::Base64)
                    .map_err(|_| Error::InvalidScalar {
                        kind: "base64",
                        text,
                    })
            }
            "nil" => {
                self.expect_close("nil")?;
                Ok(Value::Nil)
            }
            "array" => self.array(),
            "struct" => self.structure(),
            other => Err(Error::Unexpected(format!("unknown type <{}>", other))),
        }
    }

    fn array(&mut self) -> Result<Value, Error> {
        let mut items = Vec::new();
        match self.next_tag()? {
            Tag::Open(name) if name == "data" => loop {
                match self.next_tag()? {
                    Tag::Open(name) if name == "value" => items.push(self.value()?),
                    Tag::Close(name) if name == "data" => break,
                    other => {
                        return Err(Error::Unexpected(format!("{:?} inside <data>", other)))
                    }
                }
            },
            Tag::Empty(name) if name == "data" => {}
            Tag::Close(name) if name == "array" => return Ok(Value::Array(items)),
            other => return Err(Error::Unexpected(format!("{:?} inside <array>", other))),
        }
        self.expect_close("array")?;
        Ok(Value::Array(items))
    }

    fn structure(&mut self) -> Result<Value, Error> {
        let mut members = BTreeMap::new();
        loop {
            match self.next_tag()? {
                Tag::Open(name) if name == "member" => {
                    self.expect_open("name")?;
                    let key = self.text("name")?;
                    self.expect_open("value")?;
                    let value = self.value()?;
                    self.expect_close("member")?;
                    members.insert(key, value);
                }
                Tag::Close(name) if name == "struct" => return Ok(Value::Struct(members)),
                other => return Err(Error::Unexpected(format!("{:?} inside <struct>", other))),
            }
        }
    }
}

fn ensure_blank(text: &str) -> Result<(), Error> {
    if text.trim().is_empty() {
        Ok(())
    } else {
        Err(Error::Unexpected(format!(
            "text {:?} before typed value",
            text
        )))
    }
}

fn cdata_text(raw: &[u8]) -> Result<String, Error> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::Unexpected("non UTF-8 CDATA section".to_string()))
}

fn empty_typed(name: &str) -> Result<Value, Error> {
    match name {
        "string" => Ok(Value::String(String::new())),
        "nil" => Ok(Value::Nil),
        "array" => Ok(Value::Array(Vec::new())),
        "struct" => Ok(Value::Struct(BTreeMap::new())),
        "base64" => Ok(Value::Base64(Vec::new())),
        other => Err(Error::Unexpected(format!("empty <{}/>", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn success(body: &str) -> String {
        format!(
            "<?xml version='1.0'?>\n<methodResponse>\n<params>\n<param>\n{}\n</param>\n</params>\n</methodResponse>\n",
            body
        )
    }

    #[test]
    fn test_encode_call_escapes_strings() {
        let xml = encode_call(
            "ticket.query",
            &[Value::String("keywords=~a&b<c&max=0".to_string())],
        );
        assert!(xml.contains("<methodName>ticket.query</methodName>"));
        assert!(xml.contains("<string>keywords=~a&amp;b&lt;c&amp;max=0</string>"));
    }

    #[test]
    fn test_encode_call_int_param() {
        let xml = encode_call("ticket.get", &[Value::Int(42)]);
        assert!(xml.contains("<param><value><int>42</int></value></param>"));
    }

    #[test]
    fn test_encoded_call_parses_as_xml() {
        let xml = encode_call(
            "ticket.getAttachment",
            &[Value::Int(7), Value::String("a b.png".to_string())],
        );
        let mut reader = Reader::from_str(&xml);
        loop {
            match reader.read_event().unwrap() {
                Event::Eof => break,
                _ => {}
            }
        }
    }

    #[test]
    fn test_parse_int_array() {
        let xml = success(
            "<value><array><data>\n<value><int>3</int></value>\n<value><i4>1</i4></value>\n</data></array></value>",
        );
        let response = parse_response(&xml).unwrap();
        assert_eq!(
            response,
            MethodResponse::Success(Value::Array(vec![Value::Int(3), Value::Int(1)]))
        );
    }

    #[test]
    fn test_parse_empty_array() {
        let xml = success("<value><array><data/></array></value>");
        let response = parse_response(&xml).unwrap();
        assert_eq!(response, MethodResponse::Success(Value::Array(vec![])));
    }

    #[test]
    fn test_parse_ticket_get_shape() {
        let xml = success(
            r#"<value><array><data>
<value><int>12</int></value>
<value><dateTime.iso8601>20220120T02:34:51</dateTime.iso8601></value>
<value><dateTime.iso8601>20220121T05:00:00</dateTime.iso8601></value>
<value><struct>
<member><name>status</name><value><string>new</string></value></member>
<member><name>summary</name><value>Crash &amp; burn</value></member>
<member><name>_ts</name><value><string>1642732800000000</string></value></member>
<member><name>changetime</name><value><dateTime.iso8601>20220121T05:00:00</dateTime.iso8601></value></member>
</struct></value>
</data></array></value>"#,
        );
        let value = match parse_response(&xml).unwrap() {
            MethodResponse::Success(v) => v,
            other => panic!("unexpected {:?}", other),
        };
        let mut items = value.into_array().unwrap();
        assert_eq!(items.len(), 4);
        let fields = items.remove(3).into_struct().unwrap();
        assert_eq!(fields["status"], Value::String("new".to_string()));
        assert_eq!(fields["summary"], Value::String("Crash & burn".to_string()));
        assert_eq!(
            fields["changetime"],
            Value::DateTime(Utc.with_ymd_and_hms(2022, 1, 21, 5, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_untyped_value_keeps_whitespace() {
        let xml = success("<value>  padded  </value>");
        let response = parse_response(&xml).unwrap();
        assert_eq!(
            response,
            MethodResponse::Success(Value::String("  padded  ".to_string()))
        );
    }

    #[test]
    fn test_parse_empty_string_forms() {
        for body in ["<value></value>", "<value><string/></value>", "<value><string></string></value>"] {
            let response = parse_response(&success(body)).unwrap();
            assert_eq!(response, MethodResponse::Success(Value::String(String::new())));
        }
    }

    #[test]
    fn test_parse_base64() {
        let xml = success("<value><base64>aGVs\nbG8=</base64></value>");
        let response = parse_response(&xml).unwrap();
        assert_eq!(response, MethodResponse::Success(Value::Base64(b"hello".to_vec())));
    }

    #[test]
    fn test_parse_fault() {
        let xml = r#"<?xml version="1.0"?>
<methodResponse><fault><value><struct>
<member><name>faultCode</name><value><int>404</int></value></member>
<member><name>faultString</name><value><string>Ticket 9 does not exist.</string></value></member>
</struct></value></fault></methodResponse>"#;
        let response = parse_response(xml).unwrap();
        assert_eq!(
            response,
            MethodResponse::Fault(Fault {
                code: 404,
                message: "Ticket 9 does not exist.".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_rejects_html() {
        let result = parse_response("<html><body>Login required</body></html>");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_bad_int() {
        let result = parse_response(&success("<value><int>abc</int></value>"));
        assert!(matches!(result, Err(Error::InvalidScalar { kind: "int", .. })));
    }

    #[test]
    fn test_parse_rejects_truncated_document() {
        let result = parse_response("<methodResponse><params><param><value><array><data>");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2022, 3, 31, 8, 15, 0).unwrap();
        assert_eq!(parse_datetime("20220331T08:15:00"), Some(expected));
        assert_eq!(parse_datetime("2022-03-31T08:15:00"), Some(expected));
        assert_eq!(parse_datetime("2022-03-31T16:15:00+08:00"), Some(expected));
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn test_into_json_converts_datetime_to_epoch() {
        let dt = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Value::DateTime(dt).into_json(),
            serde_json::json!(dt.timestamp())
        );
        assert_eq!(Value::Nil.into_json(), serde_json::Value::Null);
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(input in ".{0,200}") {
            let _ = parse_response(&input);
        }

        #[test]
        fn prop_string_param_roundtrip(s in "[a-zA-Z0-9 &<>'\"éß漢]{0,40}") {
            let call = encode_call("m", &[Value::String(s.clone())]);
            let body = call
                .split("<param>").nth(1).unwrap()
                .split("</param>").next().unwrap();
            let response = parse_response(&success(body)).unwrap();
            prop_assert_eq!(response, MethodResponse::Success(Value::String(s)));
        }
    }
}
