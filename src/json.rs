//! Proto JSON encoding and decoding.
//!
//! Encoding goes through `serde::Serialize` wrappers around
//! [`DynamicMessageRef`]; decoding walks a parsed [`serde_json::Value`] and
//! stores fields through [`DynamicMessage`]. Proto JSON rules applied here:
//!
//! - 64-bit integers as strings
//! - Float NaN/Infinity as strings: `"NaN"`, `"Infinity"`, `"-Infinity"`
//! - Bytes as base64-encoded strings
//! - Enums by value name
//! - `google.protobuf.Timestamp` as RFC 3339, `Duration` as `"1.5s"`

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use serde::Serialize;
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde_json::Value as Json;

use crate::arena::Arena;
use crate::base::{Message, MessageValue};
use crate::defs::{FieldDef, MessageDef, WellKnownType};
use crate::error::{Error, Result};
use crate::mini_table::CType;
use crate::reflection::{DynamicMessage, DynamicMessageRef, Value};
use crate::string_view::StringView;

const MAX_DEPTH: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonEncodeOptions {
    /// Also write fields without presence that hold their zero value.
    pub emit_defaults: bool,
    /// Key fields by their proto name instead of their json_name.
    pub use_proto_names: bool,
    pub format_enums_as_integers: bool,
}

impl JsonEncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_emit_defaults(self) -> Self {
        JsonEncodeOptions { emit_defaults: true, ..self }
    }

    pub fn with_proto_names(self) -> Self {
        JsonEncodeOptions { use_proto_names: true, ..self }
    }

    pub fn with_enums_as_integers(self) -> Self {
        JsonEncodeOptions { format_enums_as_integers: true, ..self }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonDecodeOptions {
    /// Skip object keys and enum names the schema does not know.
    pub ignore_unknown: bool,
}

impl JsonDecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignore_unknown(self) -> Self {
        JsonDecodeOptions { ignore_unknown: true }
    }
}

/// Writes `msg` as proto JSON.
pub fn encode(msg: Message, def: MessageDef<'_>, options: JsonEncodeOptions) -> Result<String> {
    tracing::trace!(message = def.full_name(), "json encode");
    // Safety: `msg` is built from `def` and nothing writes it during encode.
    let json = JsonMessage { msg: unsafe { DynamicMessageRef::new(msg, def) }, options };
    serde_json::to_string(&json).map_err(|e| {
        tracing::debug!(error = %e, "json encode failed");
        Error::json(e.to_string())
    })
}

/// Parses proto JSON from `buf` and merges it into `msg`.
pub fn decode<'a>(
    buf: &[u8],
    msg: Message,
    def: MessageDef<'_>,
    options: JsonDecodeOptions,
    arena: &'a Arena<'a>,
) -> Result<()> {
    tracing::trace!(message = def.full_name(), len = buf.len(), "json decode");
    let result = serde_json::from_slice::<Json>(buf)
        .map_err(|e| Error::json(e.to_string()))
        .and_then(|json| {
            // Safety: `msg` belongs to `def` and `arena`; `target` is the only
            // handle used until it is dropped.
            let mut target = unsafe { DynamicMessage::wrap(msg, def, arena) };
            Decoder { options, arena }.merge_message(&mut target, &json, 0)
        });
    if let Err(err) = &result {
        tracing::debug!(error = %err, "json decode failed");
    }
    result
}

// Timestamp validation and formatting
fn validate_timestamp(seconds: i64, nanos: i32) -> core::result::Result<(), &'static str> {
    // 0001-01-01T00:00:00Z to 9999-12-31T23:59:59.999999999Z
    if !(-62135596800..=253402300799).contains(&seconds) {
        return Err("Timestamp seconds out of valid range");
    }
    if !(0..=999_999_999).contains(&nanos) {
        return Err("Timestamp nanos must be in range [0, 999999999]");
    }
    Ok(())
}

/// `.sss`, `.ssssss` or `.sssssssss`, whichever is exact; empty for zero.
fn fraction(nanos: u32) -> String {
    if nanos == 0 {
        String::new()
    } else if nanos % 1_000_000 == 0 {
        format!(".{:03}", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!(".{:06}", nanos / 1_000)
    } else {
        format!(".{nanos:09}")
    }
}

fn format_timestamp(seconds: i64, nanos: i32) -> core::result::Result<String, &'static str> {
    validate_timestamp(seconds, nanos)?;
    let dt = time::OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| "Invalid timestamp")?;
    let whole = dt
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|_| "Format error")?;
    let date_time = whole.trim_end_matches('Z');
    Ok(format!("{date_time}{}Z", fraction(nanos as u32)))
}

fn parse_timestamp(s: &str) -> core::result::Result<(i64, i32), &'static str> {
    let dt = time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .map_err(|_| "Invalid RFC 3339 timestamp")?;
    let seconds = dt.unix_timestamp();
    let nanos = dt.nanosecond() as i32;
    validate_timestamp(seconds, nanos)?;
    Ok((seconds, nanos))
}

// Duration validation and formatting
fn validate_duration(seconds: i64, nanos: i32) -> core::result::Result<(), &'static str> {
    // roughly 10,000 years either way
    if !(-315576000000..=315576000000).contains(&seconds) {
        return Err("Duration seconds out of valid range");
    }
    if !(-999_999_999..=999_999_999).contains(&nanos) {
        return Err("Duration nanos must be in range [-999999999, 999999999]");
    }
    if (seconds > 0 && nanos < 0) || (seconds < 0 && nanos > 0) {
        return Err("Duration seconds and nanos must have the same sign");
    }
    Ok(())
}

fn format_duration(seconds: i64, nanos: i32) -> core::result::Result<String, &'static str> {
    validate_duration(seconds, nanos)?;
    let sign = if seconds < 0 || nanos < 0 { "-" } else { "" };
    Ok(format!(
        "{sign}{}{}s",
        seconds.unsigned_abs(),
        fraction(nanos.unsigned_abs())
    ))
}

fn parse_duration(s: &str) -> core::result::Result<(i64, i32), &'static str> {
    let body = s.strip_suffix('s').ok_or("Duration must end with 's'")?;
    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let (sec_str, frac_str) = body.split_once('.').unwrap_or((body, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if sec_str.is_empty() || !all_digits(sec_str) || !all_digits(frac_str) || frac_str.len() > 9 {
        return Err("Invalid duration");
    }
    let seconds: i64 = sec_str.parse().map_err(|_| "Invalid seconds")?;
    let nanos: i32 = if frac_str.is_empty() {
        0
    } else {
        format!("{frac_str:0<9}").parse().map_err(|_| "Invalid nanos")?
    };
    let (seconds, nanos) = if negative { (-seconds, -nanos) } else { (seconds, nanos) };
    validate_duration(seconds, nanos)?;
    Ok((seconds, nanos))
}

/// `(seconds, nanos)` of a Timestamp or Duration message.
fn seconds_nanos(msg: DynamicMessageRef<'_, '_>) -> (i64, i32) {
    let def = msg.descriptor();
    let seconds = match def.find_field_by_number(1).and_then(|f| msg.get_field(f)) {
        Some(Value::Int64(s)) => s,
        _ => 0,
    };
    let nanos = match def.find_field_by_number(2).and_then(|f| msg.get_field(f)) {
        Some(Value::Int32(n)) => n,
        _ => 0,
    };
    (seconds, nanos)
}

struct JsonMessage<'p, 'a> {
    msg: DynamicMessageRef<'p, 'a>,
    options: JsonEncodeOptions,
}

impl Serialize for JsonMessage<'_, '_> {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let def = self.msg.descriptor();
        match def.well_known_type() {
            Some(WellKnownType::Timestamp) => {
                let (seconds, nanos) = seconds_nanos(self.msg);
                serializer.serialize_str(&format_timestamp(seconds, nanos).map_err(S::Error::custom)?)
            }
            Some(WellKnownType::Duration) => {
                let (seconds, nanos) = seconds_nanos(self.msg);
                serializer.serialize_str(&format_duration(seconds, nanos).map_err(S::Error::custom)?)
            }
            None => {
                let mut map = serializer.serialize_map(None)?;
                for field in def.fields() {
                    let value = match self.msg.get_field(field) {
                        Some(value) => value,
                        None if self.options.emit_defaults && !field.has_presence() => {
                            match self.msg.get_or_default(field) {
                                Some(value) => value,
                                None => continue,
                            }
                        }
                        None => continue,
                    };
                    let name = if self.options.use_proto_names {
                        field.name()
                    } else {
                        field.json_name()
                    };
                    map.serialize_entry(name, &JsonValue { value, field, options: self.options })?;
                }
                for (field, value) in self.msg.extensions() {
                    let name = format!("[{}]", field.full_name());
                    map.serialize_entry(&name, &JsonValue { value, field, options: self.options })?;
                }
                map.end()
            }
        }
    }
}

/// One field value; `field` supplies enum names and element types.
struct JsonValue<'p, 'a> {
    value: Value<'p, 'a>,
    field: FieldDef<'p>,
    options: JsonEncodeOptions,
}

fn float_name(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn map_key_string(key: &Value<'_, '_>) -> Option<String> {
    Some(match key {
        Value::Bool(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::UInt32(v) => v.to_string(),
        Value::UInt64(v) => v.to_string(),
        Value::String(v) => String::from_utf8_lossy(v.as_bytes()).into_owned(),
        _ => return None,
    })
}

impl Serialize for JsonValue<'_, '_> {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let options = self.options;
        match self.value {
            Value::Bool(v) => serializer.serialize_bool(v),
            Value::Int32(v) => serializer.serialize_i32(v),
            Value::UInt32(v) => serializer.serialize_u32(v),
            // 64-bit integers are quoted in proto JSON.
            Value::Int64(v) => serializer.collect_str(&v),
            Value::UInt64(v) => serializer.collect_str(&v),
            Value::Float(v) if v.is_finite() => serializer.serialize_f32(v),
            Value::Float(v) => serializer.serialize_str(float_name(v as f64)),
            Value::Double(v) if v.is_finite() => serializer.serialize_f64(v),
            Value::Double(v) => serializer.serialize_str(float_name(v)),
            Value::Enum(v) => {
                let name = self
                    .field
                    .enum_type()
                    .and_then(|e| e.find_value_by_number(v))
                    .filter(|_| !options.format_enums_as_integers);
                match name {
                    Some(value) => serializer.serialize_str(value.name()),
                    None => serializer.serialize_i32(v),
                }
            }
            Value::String(v) => match v.to_str() {
                Some(s) => serializer.serialize_str(s),
                None => Err(S::Error::custom(format!("{} holds invalid UTF-8", self.field.full_name()))),
            },
            Value::Bytes(v) => serializer.serialize_str(&STANDARD.encode(v.as_bytes())),
            Value::Message(msg) => JsonMessage { msg, options }.serialize(serializer),
            Value::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for value in list.iter() {
                    seq.serialize_element(&JsonValue { value, field: self.field, options })?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let value_field = self
                    .field
                    .message_type()
                    .and_then(|entry| entry.map_value())
                    .ok_or_else(|| S::Error::custom("map entry without a value field"))?;
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.sorted_entries() {
                    let key = map_key_string(&key).ok_or_else(|| S::Error::custom("invalid map key type"))?;
                    map.serialize_entry(&key, &JsonValue { value, field: value_field, options })?;
                }
                map.end()
            }
        }
    }
}

struct Decoder<'a> {
    options: JsonDecodeOptions,
    arena: &'a Arena<'a>,
}

fn type_error(field: FieldDef<'_>, json: &Json) -> Error {
    Error::json(format!("invalid value for {}: {json}", field.full_name()))
}

impl<'a> Decoder<'a> {
    fn merge_message<'p>(&self, msg: &mut DynamicMessage<'p, '_>, json: &Json, depth: u32) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::json("max depth exceeded"));
        }
        let def = msg.descriptor();
        if let Some(kind) = def.well_known_type() {
            let s = json
                .as_str()
                .ok_or_else(|| Error::json(format!("{} must be a string", def.full_name())))?;
            let parsed = match kind {
                WellKnownType::Timestamp => parse_timestamp(s),
                WellKnownType::Duration => parse_duration(s),
            };
            let (seconds, nanos) = parsed.map_err(Error::json)?;
            if let Some(f) = def.find_field_by_number(1) {
                msg.set_field(f, MessageValue::Int64(seconds))?;
            }
            if let Some(f) = def.find_field_by_number(2) {
                msg.set_field(f, MessageValue::Int32(nanos))?;
            }
            return Ok(());
        }

        let object = json
            .as_object()
            .ok_or_else(|| Error::json(format!("{} must be an object", def.full_name())))?;
        for (key, value) in object {
            let field = match key.strip_prefix('[').and_then(|k| k.strip_suffix(']')) {
                Some(ext_name) => def
                    .pool()
                    .find_extension_by_name(ext_name)
                    .filter(|f| f.containing_type() == Some(def)),
                None => def.find_field_by_json_name(key).or_else(|| def.find_field_by_name(key)),
            };
            let Some(field) = field else {
                if self.options.ignore_unknown {
                    continue;
                }
                return Err(Error::json(format!("no such field {key} in {}", def.full_name())));
            };
            if value.is_null() {
                continue;
            }
            self.merge_field(msg, field, value, depth)?;
        }
        Ok(())
    }

    fn merge_field<'p>(
        &self,
        msg: &mut DynamicMessage<'p, '_>,
        field: FieldDef<'p>,
        json: &Json,
        depth: u32,
    ) -> Result<()> {
        if field.is_map() {
            let entry = field.message_type().ok_or_else(|| type_error(field, json))?;
            let (key_field, value_field) = entry
                .map_key()
                .zip(entry.map_value())
                .ok_or_else(|| Error::json(format!("{} is not a map entry", entry.full_name())))?;
            let object = json.as_object().ok_or_else(|| type_error(field, json))?;
            for (key, value) in object {
                let key = self.map_key(key_field, key)?;
                let Some(value) = self.element(value_field, value, depth)? else {
                    continue;
                };
                msg.insert(field, key, value)?;
            }
            return Ok(());
        }
        if field.is_repeated() {
            let items = json.as_array().ok_or_else(|| type_error(field, json))?;
            for item in items {
                if let Some(value) = self.element(field, item, depth)? {
                    msg.append(field, value)?;
                }
            }
            return Ok(());
        }
        if field.is_sub_message() {
            let mut sub = msg.mutable_message(field)?;
            return self.merge_message(&mut sub, json, depth + 1);
        }
        if let Some(value) = self.scalar(field, json)? {
            msg.set_field(field, value)?;
        }
        Ok(())
    }

    /// A repeated element or map value. Messages are built in the arena.
    fn element(&self, field: FieldDef<'_>, json: &Json, depth: u32) -> Result<Option<MessageValue>> {
        match field.message_type() {
            Some(def) => {
                let mut sub = DynamicMessage::new(def, self.arena)?;
                self.merge_message(&mut sub, json, depth + 1)?;
                Ok(Some(MessageValue::Message(sub.message())))
            }
            None => self.scalar(field, json),
        }
    }

    fn map_key(&self, field: FieldDef<'_>, key: &str) -> Result<MessageValue> {
        let bad = || Error::json(format!("invalid map key {key:?} for {}", field.full_name()));
        Ok(match field.ctype() {
            CType::Bool => match key {
                "true" => MessageValue::Bool(true),
                "false" => MessageValue::Bool(false),
                _ => return Err(bad()),
            },
            CType::Int32 => MessageValue::Int32(key.parse().map_err(|_| bad())?),
            CType::Int64 => MessageValue::Int64(key.parse().map_err(|_| bad())?),
            CType::UInt32 => MessageValue::UInt32(key.parse().map_err(|_| bad())?),
            CType::UInt64 => MessageValue::UInt64(key.parse().map_err(|_| bad())?),
            CType::String => MessageValue::String(self.copy(key.as_bytes())?),
            _ => return Err(bad()),
        })
    }

    fn copy(&self, bytes: &[u8]) -> Result<StringView> {
        StringView::copy_in(bytes, self.arena).ok_or(Error::OutOfMemory)
    }

    /// `None` for an unknown enum name skipped under `ignore_unknown`.
    fn scalar(&self, field: FieldDef<'_>, json: &Json) -> Result<Option<MessageValue>> {
        let bad = || type_error(field, json);
        let value = match field.ctype() {
            CType::Bool => MessageValue::Bool(json.as_bool().ok_or_else(bad)?),
            CType::Int32 => {
                let v = integer(json).ok_or_else(bad)?;
                MessageValue::Int32(i32::try_from(v).map_err(|_| bad())?)
            }
            CType::Int64 => {
                let v = integer(json).ok_or_else(bad)?;
                MessageValue::Int64(i64::try_from(v).map_err(|_| bad())?)
            }
            CType::UInt32 => {
                let v = integer(json).ok_or_else(bad)?;
                MessageValue::UInt32(u32::try_from(v).map_err(|_| bad())?)
            }
            CType::UInt64 => {
                let v = integer(json).ok_or_else(bad)?;
                MessageValue::UInt64(u64::try_from(v).map_err(|_| bad())?)
            }
            CType::Float => {
                let v = float(json).ok_or_else(bad)?;
                if v.is_finite() && v.abs() > f32::MAX as f64 {
                    return Err(bad());
                }
                MessageValue::Float(v as f32)
            }
            CType::Double => MessageValue::Double(float(json).ok_or_else(bad)?),
            CType::String => MessageValue::String(self.copy(json.as_str().ok_or_else(bad)?.as_bytes())?),
            CType::Bytes => {
                let text = json.as_str().ok_or_else(bad)?;
                let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
                    .iter()
                    .find_map(|engine| engine.decode(text).ok())
                    .ok_or_else(bad)?;
                MessageValue::String(self.copy(&bytes)?)
            }
            CType::Enum => match json {
                Json::String(name) => {
                    let found = field.enum_type().and_then(|e| e.find_value_by_name(name));
                    match found {
                        Some(value) => MessageValue::Int32(value.number()),
                        None if self.options.ignore_unknown => return Ok(None),
                        None => return Err(Error::json(format!("unknown enum value {name} for {}", field.full_name()))),
                    }
                }
                _ => {
                    let v = integer(json).ok_or_else(bad)?;
                    MessageValue::Int32(i32::try_from(v).map_err(|_| bad())?)
                }
            },
            CType::Message => return Err(bad()),
        };
        Ok(Some(value))
    }
}

/// Integers may be JSON numbers (integral floats included) or decimal strings.
fn integer(json: &Json) -> Option<i128> {
    match json {
        Json::Number(n) => {
            if let Some(v) = n.as_i64() {
                Some(v as i128)
            } else if let Some(v) = n.as_u64() {
                Some(v as i128)
            } else {
                let f = n.as_f64()?;
                (f.fract() == 0.0 && f.abs() < 1.9e19).then_some(f as i128)
            }
        }
        Json::String(s) => s.trim().parse().ok().filter(|_| !s.is_empty() && s.trim() == s),
        _ => None,
    }
}

fn float(json: &Json) -> Option<f64> {
    match json {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            other => other.parse().ok().filter(|v: &f64| v.is_finite()),
        },
        _ => None,
    }
}
