//! Value Envelope Module
//!
//! Type-preserving wrapper used by every backend to round-trip values through a
//! text-oriented store. Wire format:
//! `{"origindata_type": <tag>, "content": <payload>, "ahead_time": <int|null>}`.

use std::borrow::Cow;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::{CacheError, Result};

// == Wire Tags ==
pub const TAG_ARRAY: &str = "array";
pub const TAG_OBJECT: &str = "object";
pub const TAG_NULL: &str = "NULL";
pub const TAG_INTEGER: &str = "integer";
pub const TAG_DOUBLE: &str = "double";
pub const TAG_BOOLEAN: &str = "boolean";
pub const TAG_STRING: &str = "string";

const TYPE_FIELD: &str = "origindata_type";
const CONTENT_FIELD: &str = "content";
const AHEAD_FIELD: &str = "ahead_time";

// == Cache Value ==
/// A value as seen by cache callers.
///
/// `List` and `Map` share the `array` tag on the wire; `Map` keeps insertion
/// order. `Object` carries an opaque, caller-serialized payload the engine
/// never interprets.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Map(Map<String, Value>),
    Object(String),
}

impl CacheValue {
    /// Wraps a serializable value as an opaque object.
    pub fn object<T: Serialize>(value: &T) -> Result<Self> {
        Ok(CacheValue::Object(serde_json::to_string(value)?))
    }

    /// Restores an opaque object written by [`CacheValue::object`].
    pub fn into_object<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            CacheValue::Object(raw) => Ok(serde_json::from_str(&raw)?),
            other => Err(CacheError::WrongType(format!(
                "expected object, found {}",
                other.tag()
            ))),
        }
    }

    /// Wire tag for this value.
    pub fn tag(&self) -> &'static str {
        match self {
            CacheValue::Null => TAG_NULL,
            CacheValue::Boolean(_) => TAG_BOOLEAN,
            CacheValue::Integer(_) => TAG_INTEGER,
            CacheValue::Double(_) => TAG_DOUBLE,
            CacheValue::String(_) => TAG_STRING,
            CacheValue::List(_) | CacheValue::Map(_) => TAG_ARRAY,
            CacheValue::Object(_) => TAG_OBJECT,
        }
    }

    // == Is Empty ==
    /// Emptiness as used by the ahead-of-expiry protocol.
    ///
    /// Null, `false`, zero, `""`, `"0"` and empty collections are empty.
    pub fn is_empty(&self) -> bool {
        match self {
            CacheValue::Null => true,
            CacheValue::Boolean(b) => !b,
            CacheValue::Integer(n) => *n == 0,
            CacheValue::Double(f) => *f == 0.0,
            CacheValue::String(s) => s.is_empty() || s == "0",
            CacheValue::List(items) => items.is_empty(),
            CacheValue::Map(map) => map.is_empty(),
            CacheValue::Object(_) => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CacheValue::Integer(n) => Some(*n),
            CacheValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::String(s) | CacheValue::Object(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a plain JSON value, mapping arrays to `List` and objects to `Map`.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => CacheValue::Null,
            Value::Bool(b) => CacheValue::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => CacheValue::Integer(i),
                None => CacheValue::Double(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => CacheValue::String(s),
            Value::Array(items) => CacheValue::List(items),
            Value::Object(map) => CacheValue::Map(map),
        }
    }

    /// Plain JSON view of the value. Opaque objects become their raw string.
    pub fn to_json(&self) -> Value {
        match self {
            CacheValue::Null => Value::Null,
            CacheValue::Boolean(b) => Value::Bool(*b),
            CacheValue::Integer(n) => Value::from(*n),
            CacheValue::Double(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CacheValue::String(s) | CacheValue::Object(s) => Value::String(s.clone()),
            CacheValue::List(items) => Value::Array(items.clone()),
            CacheValue::Map(map) => Value::Object(map.clone()),
        }
    }
}

impl From<bool> for CacheValue {
    fn from(b: bool) -> Self {
        CacheValue::Boolean(b)
    }
}

impl From<i64> for CacheValue {
    fn from(n: i64) -> Self {
        CacheValue::Integer(n)
    }
}

impl From<f64> for CacheValue {
    fn from(f: f64) -> Self {
        CacheValue::Double(f)
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::String(s.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        CacheValue::String(s)
    }
}

impl From<Vec<Value>> for CacheValue {
    fn from(items: Vec<Value>) -> Self {
        CacheValue::List(items)
    }
}

impl From<Map<String, Value>> for CacheValue {
    fn from(map: Map<String, Value>) -> Self {
        CacheValue::Map(map)
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        CacheValue::from_json(value)
    }
}

// == Wire Representation ==
#[derive(Serialize)]
#[serde(untagged)]
enum Content<'a> {
    Null,
    Text(Cow<'a, str>),
    List(&'a [Value]),
    Map(&'a Map<String, Value>),
}

#[derive(Serialize)]
struct Envelope<'a> {
    origindata_type: &'static str,
    content: Content<'a>,
    ahead_time: Option<i64>,
}

// == Serialize ==
/// Encodes a value into its envelope, optionally stamped with an
/// ahead-of-expiry timestamp.
pub fn serialize(value: &CacheValue, ahead_time: Option<i64>) -> Result<String> {
    let content = match value {
        CacheValue::Null => Content::Null,
        CacheValue::Boolean(true) => Content::Text(Cow::Borrowed("1")),
        CacheValue::Boolean(false) => Content::Text(Cow::Borrowed("")),
        CacheValue::Integer(n) => Content::Text(Cow::Owned(n.to_string())),
        CacheValue::Double(f) => Content::Text(Cow::Owned(f.to_string())),
        CacheValue::String(s) | CacheValue::Object(s) => {
            Content::Text(Cow::Borrowed(s.as_str()))
        }
        CacheValue::List(items) => Content::List(items),
        CacheValue::Map(map) => Content::Map(map),
    };

    let envelope = Envelope {
        origindata_type: value.tag(),
        content,
        ahead_time,
    };
    Ok(serde_json::to_string(&envelope)?)
}

// == Deserialize ==
/// Decodes stored text back into a value.
///
/// Absent data decodes to `None`. Purely numeric text is returned as a number
/// without envelope parsing (raw counters never go through the envelope).
/// Text that is not an envelope degrades to its JSON value, or to the raw
/// string when it is not JSON at all.
pub fn deserialize(raw: Option<&str>) -> Option<CacheValue> {
    let raw = raw?;
    if let Some(number) = parse_numeric(raw) {
        return Some(number);
    }

    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return Some(CacheValue::String(raw.to_string())),
    };

    match parsed {
        Value::Object(mut map) if map.contains_key(TYPE_FIELD) => {
            let tag = map
                .get(TYPE_FIELD)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let content = map.remove(CONTENT_FIELD).unwrap_or(Value::Null);
            Some(decode_content(&tag, content))
        }
        value @ (Value::Object(_) | Value::Array(_)) => Some(CacheValue::from_json(value)),
        _ => Some(CacheValue::String(raw.to_string())),
    }
}

fn decode_content(tag: &str, content: Value) -> CacheValue {
    match tag {
        TAG_NULL => CacheValue::Null,
        TAG_ARRAY => match content {
            Value::Null => CacheValue::List(Vec::new()),
            other => CacheValue::from_json(other),
        },
        TAG_OBJECT => match content {
            Value::String(raw) => CacheValue::Object(raw),
            other => CacheValue::from_json(other),
        },
        TAG_INTEGER => CacheValue::Integer(match &content {
            Value::String(s) => s.trim().parse().unwrap_or(0),
            Value::Number(n) => n.as_i64().unwrap_or(0),
            _ => 0,
        }),
        TAG_DOUBLE => CacheValue::Double(match &content {
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }),
        TAG_BOOLEAN => CacheValue::Boolean(match &content {
            Value::String(s) => !(s.is_empty() || s == "0"),
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }),
        // string and unknown tags hand back the payload as-is
        _ => match content {
            Value::String(s) => CacheValue::String(s),
            other => CacheValue::from_json(other),
        },
    }
}

// == Pack Modes ==
/// How a backend lays values out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackMode {
    /// Tagged envelope, see [`serialize`].
    #[default]
    Envelope,
    /// Plain JSON with no tag and no ahead marker. Readable by non-Rust
    /// clients, but doubles come back as integers when they have no fraction
    /// and ahead-of-expiry refreshes never trigger.
    Json,
    /// Every value packed as an opaque `object` whose content is the value's
    /// own envelope.
    Object,
}

impl std::str::FromStr for PackMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "envelope" | "default" => Ok(PackMode::Envelope),
            "json" => Ok(PackMode::Json),
            "object" | "serialize" => Ok(PackMode::Object),
            other => Err(CacheError::Config(format!("unknown pack mode: {}", other))),
        }
    }
}

/// Encodes a value in the given mode. `ahead_time` is dropped in
/// [`PackMode::Json`].
pub fn pack(value: &CacheValue, ahead_time: Option<i64>, mode: PackMode) -> Result<String> {
    match mode {
        PackMode::Envelope => serialize(value, ahead_time),
        PackMode::Json => Ok(serde_json::to_string(&value.to_json())?),
        PackMode::Object => {
            let inner = serialize(value, None)?;
            serialize(&CacheValue::Object(inner), ahead_time)
        }
    }
}

/// Decodes text written by [`pack`] in the given mode. Envelopes are still
/// recognised in every mode.
pub fn unpack(raw: Option<&str>, mode: PackMode) -> Option<CacheValue> {
    match mode {
        PackMode::Envelope => deserialize(raw),
        PackMode::Json => {
            let raw = raw?;
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) if map.contains_key(TYPE_FIELD) => deserialize(Some(raw)),
                Ok(value) => Some(CacheValue::from_json(value)),
                Err(_) => deserialize(Some(raw)),
            }
        }
        PackMode::Object => match deserialize(raw)? {
            CacheValue::Object(inner) => deserialize(Some(&inner)),
            other => Some(other),
        },
    }
}

// == Ahead Time ==
/// Extracts the ahead-of-expiry marker.
///
/// Returns `i64::MAX` ("never refresh") for absent, numeric, unparseable or
/// marker-less data.
pub fn ahead_time(raw: Option<&str>) -> i64 {
    let Some(raw) = raw else {
        return i64::MAX;
    };
    if is_numeric(raw) {
        return i64::MAX;
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => match map.get(AHEAD_FIELD) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(i64::MAX),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(i64::MAX),
            _ => i64::MAX,
        },
        _ => i64::MAX,
    }
}

// == Numeric Detection ==
/// Lexical number check: optional sign, digits with an optional fraction,
/// optional exponent; surrounding whitespace is tolerated.
pub fn is_numeric(raw: &str) -> bool {
    let s = raw.trim().as_bytes();
    let mut i = 0;
    if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
        i += 1;
    }

    let int_start = i;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;

    if i < s.len() && s[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return false;
    }

    if i < s.len() && (s[i] == b'e' || s[i] == b'E') {
        i += 1;
        if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == s.len()
}

fn parse_numeric(raw: &str) -> Option<CacheValue> {
    if !is_numeric(raw) {
        return None;
    }
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(CacheValue::Integer(n));
    }
    trimmed.parse::<f64>().ok().map(CacheValue::Double)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: CacheValue) -> Option<CacheValue> {
        let encoded = serialize(&value, None).unwrap();
        deserialize(Some(&encoded))
    }

    #[test]
    fn test_wire_format() {
        let encoded = serialize(&CacheValue::from("hello"), Some(1_700_000_000)).unwrap();
        let parsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed["origindata_type"], "string");
        assert_eq!(parsed["content"], "hello");
        assert_eq!(parsed["ahead_time"], 1_700_000_000);
    }

    #[test]
    fn test_scalar_content_is_textual() {
        let encoded = serialize(&CacheValue::Integer(42), None).unwrap();
        assert_eq!(
            encoded,
            r#"{"origindata_type":"integer","content":"42","ahead_time":null}"#
        );

        let encoded = serialize(&CacheValue::Boolean(false), None).unwrap();
        assert!(encoded.contains(r#""content":"""#));
    }

    #[test]
    fn test_round_trip_scalars() {
        assert_eq!(round_trip(CacheValue::Null), Some(CacheValue::Null));
        assert_eq!(round_trip(true.into()), Some(CacheValue::Boolean(true)));
        assert_eq!(round_trip(false.into()), Some(CacheValue::Boolean(false)));
        assert_eq!(round_trip(7i64.into()), Some(CacheValue::Integer(7)));
        assert_eq!(round_trip(2.5f64.into()), Some(CacheValue::Double(2.5)));
        assert_eq!(round_trip("text".into()), Some(CacheValue::from("text")));
    }

    #[test]
    fn test_round_trip_numeric_looking_string_keeps_type() {
        assert_eq!(round_trip("123".into()), Some(CacheValue::from("123")));
    }

    #[test]
    fn test_round_trip_ordered_map() {
        let mut map = Map::new();
        map.insert("zeta".into(), json!(1));
        map.insert("alpha".into(), json!({"nested": [1, 2, 3]}));
        let decoded = round_trip(CacheValue::Map(map.clone())).unwrap();

        match decoded {
            CacheValue::Map(got) => {
                let keys: Vec<_> = got.keys().cloned().collect();
                assert_eq!(keys, vec!["zeta", "alpha"]);
                assert_eq!(got, map);
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_object() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct User {
            id: u32,
            name: String,
        }
        let user = User {
            id: 9,
            name: "ada".into(),
        };
        let decoded = round_trip(CacheValue::object(&user).unwrap()).unwrap();
        assert_eq!(decoded.into_object::<User>().unwrap(), user);
    }

    #[test]
    fn test_deserialize_absent() {
        assert_eq!(deserialize(None), None);
    }

    #[test]
    fn test_deserialize_raw_counter() {
        assert_eq!(deserialize(Some("15")), Some(CacheValue::Integer(15)));
        assert_eq!(deserialize(Some("-3")), Some(CacheValue::Integer(-3)));
        assert_eq!(deserialize(Some("1.5e3")), Some(CacheValue::Double(1500.0)));
    }

    #[test]
    fn test_deserialize_foreign_text() {
        assert_eq!(
            deserialize(Some("not json at all")),
            Some(CacheValue::from("not json at all"))
        );
        assert_eq!(
            deserialize(Some(r#"{"plain":true}"#)),
            Some(CacheValue::from_json(json!({"plain": true})))
        );
    }

    #[test]
    fn test_ahead_time_extraction() {
        let encoded = serialize(&CacheValue::from("v"), Some(100)).unwrap();
        assert_eq!(ahead_time(Some(&encoded)), 100);

        let encoded = serialize(&CacheValue::from("v"), None).unwrap();
        assert_eq!(ahead_time(Some(&encoded)), i64::MAX);
        assert_eq!(ahead_time(None), i64::MAX);
        assert_eq!(ahead_time(Some("12")), i64::MAX);
        assert_eq!(ahead_time(Some("{broken")), i64::MAX);
    }

    #[test]
    fn test_pack_json_is_plain() {
        let value = CacheValue::from_json(json!({"a": [1, "b"]}));
        let raw = pack(&value, Some(100), PackMode::Json).unwrap();
        assert_eq!(raw, r#"{"a":[1,"b"]}"#);
        assert_eq!(ahead_time(Some(&raw)), i64::MAX);
        assert_eq!(unpack(Some(&raw), PackMode::Json), Some(value));

        let raw = pack(&CacheValue::from("hi"), None, PackMode::Json).unwrap();
        assert_eq!(raw, r#""hi""#);
        assert_eq!(unpack(Some(&raw), PackMode::Json), Some(CacheValue::from("hi")));
        assert_eq!(unpack(Some("not json"), PackMode::Json), Some(CacheValue::from("not json")));
    }

    #[test]
    fn test_pack_object_wraps_everything() {
        for value in [
            CacheValue::Integer(7),
            CacheValue::Boolean(false),
            CacheValue::from("text"),
            CacheValue::Object("{\"k\":1}".into()),
        ] {
            let raw = pack(&value, Some(42), PackMode::Object).unwrap();
            assert!(raw.contains(r#""origindata_type":"object""#));
            assert_eq!(ahead_time(Some(&raw)), 42);
            assert_eq!(unpack(Some(&raw), PackMode::Object), Some(value));
        }

        let plain = serialize(&CacheValue::from("x"), None).unwrap();
        assert_eq!(unpack(Some(&plain), PackMode::Object), Some(CacheValue::from("x")));
    }

    #[test]
    fn test_is_numeric() {
        for ok in ["0", "-1", "+2", "3.", ".5", "1e10", " 42 ", "6.02E+23"] {
            assert!(is_numeric(ok), "{} should be numeric", ok);
        }
        for bad in ["", "-", ".", "1e", "abc", "12abc", "0x1A", "inf", "NaN"] {
            assert!(!is_numeric(bad), "{} should not be numeric", bad);
        }
    }

    #[test]
    fn test_is_empty() {
        assert!(CacheValue::Null.is_empty());
        assert!(CacheValue::from("0").is_empty());
        assert!(CacheValue::Integer(0).is_empty());
        assert!(CacheValue::List(vec![]).is_empty());
        assert!(!CacheValue::from("x").is_empty());
        assert!(!CacheValue::Object("{}".into()).is_empty());
    }
}
