use super::{EncodedType, field_flags, field_modifier, idx, message_modifier, to_base92, value, version};
use crate::mini_table::FieldType;
use crate::utils::log2_ceiling;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OneofState {
    NotStarted,
    StartedOneof,
    EmittedOneofField,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Message {
        msg_mod: u64,
        last_field_num: u32,
        oneof_state: OneofState,
    },
    Enum {
        present_values_mask: u64,
        last_written_value: u32,
    },
}

/// Incremental writer for mini-descriptors.
///
/// Fields must be added in increasing number order and enum values in
/// increasing unsigned order; out-of-order input is rejected with `false`.
#[derive(Debug, Clone)]
pub struct MtDataEncoder {
    buf: String,
    state: State,
}

impl Default for MtDataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MtDataEncoder {
    pub fn new() -> Self {
        MtDataEncoder {
            buf: String::new(),
            state: State::Message {
                msg_mod: 0,
                last_field_num: 0,
                oneof_state: OneofState::NotStarted,
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn finish(self) -> String {
        self.buf
    }

    fn put_raw(&mut self, ch: u8) {
        self.buf.push(ch as char);
    }

    fn put(&mut self, v: u32) {
        self.put_raw(to_base92(v as u8));
    }

    fn put_base92_varint(&mut self, mut val: u32, min: u8, max: u8) {
        let shift = log2_ceiling((idx(max) - idx(min) + 1) as usize);
        let mask = (1u32 << shift) - 1;
        loop {
            let bits = val & mask;
            self.put(bits + idx(min));
            val >>= shift;
            if val == 0 {
                break;
            }
        }
    }

    fn put_modifier(&mut self, modifier: u64) {
        if modifier != 0 {
            self.put_base92_varint(modifier as u32, value::MIN_MODIFIER, value::MAX_MODIFIER);
        }
    }

    fn reset_message(&mut self, msg_mod: u64) {
        self.state = State::Message {
            msg_mod,
            last_field_num: 0,
            oneof_state: OneofState::NotStarted,
        };
    }

    /// Begins a message descriptor with the given
    /// [`message_modifier`](super::message_modifier) bits.
    pub fn start_message(&mut self, msg_mod: u64) {
        self.reset_message(msg_mod);
        self.put_raw(version::MESSAGE);
        self.put_modifier(msg_mod);
    }

    /// Appends a field. `flags` are [`field_flags`](super::field_flags) bits.
    pub fn put_field(&mut self, field_type: FieldType, number: u32, flags: u64) -> bool {
        let State::Message {
            msg_mod,
            last_field_num,
            ..
        } = self.state
        else {
            return false;
        };
        if number <= last_field_num {
            return false;
        }
        if last_field_num + 1 != number {
            self.put_base92_varint(number - last_field_num, value::MIN_SKIP, value::MAX_SKIP);
        }
        if let State::Message { last_field_num, .. } = &mut self.state {
            *last_field_num = number;
        }

        let mut encoded = encoded_type(field_type) as u32;
        if flags & field_flags::IS_CLOSED_ENUM != 0 {
            if field_type != FieldType::Enum {
                return false;
            }
            encoded = EncodedType::ClosedEnum as u32;
        }
        if flags & field_flags::IS_REPEATED != 0 {
            encoded += EncodedType::REPEATED_BASE as u32;
        }
        self.put(encoded);

        let mut modifiers = 0u64;
        if flags & field_flags::IS_REPEATED != 0 && field_type.is_packable() {
            let field_is_packed = flags & field_flags::IS_PACKED != 0;
            let default_is_packed = msg_mod & message_modifier::DEFAULT_IS_PACKED != 0;
            if field_is_packed != default_is_packed {
                modifiers |= field_modifier::FLIP_PACKED as u64;
            }
        }
        if field_type == FieldType::String {
            let field_validates = flags & field_flags::VALIDATE_UTF8 != 0;
            let message_validates = msg_mod & message_modifier::VALIDATE_UTF8 != 0;
            if field_validates != message_validates {
                // Only the lax direction can be expressed.
                if message_validates {
                    return false;
                }
                modifiers |= field_modifier::FLIP_VALIDATE_UTF8 as u64;
            }
        }
        if flags & field_flags::IS_PROTO3_SINGULAR != 0 {
            modifiers |= field_modifier::IS_PROTO3_SINGULAR as u64;
        }
        if flags & field_flags::IS_REQUIRED != 0 {
            modifiers |= field_modifier::IS_REQUIRED as u64;
        }
        self.put_modifier(modifiers);
        true
    }

    pub fn start_oneof(&mut self) -> bool {
        let State::Message { oneof_state, .. } = &mut self.state else {
            return false;
        };
        let ch = if *oneof_state == OneofState::NotStarted {
            value::END
        } else {
            value::ONEOF_SEPARATOR
        };
        *oneof_state = OneofState::StartedOneof;
        self.put_raw(ch);
        true
    }

    pub fn put_oneof_field(&mut self, number: u32) -> bool {
        let State::Message { oneof_state, .. } = &mut self.state else {
            return false;
        };
        let separate = *oneof_state == OneofState::EmittedOneofField;
        *oneof_state = OneofState::EmittedOneofField;
        if separate {
            self.put_raw(value::FIELD_SEPARATOR);
        }
        self.put_base92_varint(number, value::MIN_ONEOF_FIELD, value::MAX_ONEOF_FIELD);
        true
    }

    pub fn start_enum(&mut self) {
        self.state = State::Enum {
            present_values_mask: 0,
            last_written_value: 0,
        };
        self.put_raw(version::ENUM);
    }

    fn flush_enum_mask(&mut self) {
        if let State::Enum {
            present_values_mask,
            last_written_value,
        } = &mut self.state
        {
            let mask = *present_values_mask as u32;
            *present_values_mask = 0;
            *last_written_value = last_written_value.wrapping_add(5);
            self.put(mask);
        }
    }

    /// Adds an enum value. Values are compared as `u32`, so negative values
    /// sort after every non-negative one.
    pub fn put_enum_value(&mut self, val: u32) -> bool {
        let State::Enum {
            present_values_mask,
            last_written_value,
        } = self.state
        else {
            return false;
        };
        if val < last_written_value {
            return false;
        }
        let mut delta = val - last_written_value;
        if delta >= 5 && present_values_mask != 0 {
            self.flush_enum_mask();
            delta -= 5;
        }
        if delta >= 5 {
            self.put_base92_varint(delta, value::MIN_SKIP, value::MAX_SKIP);
            if let State::Enum { last_written_value, .. } = &mut self.state {
                *last_written_value += delta;
            }
            delta = 0;
        }
        if let State::Enum { present_values_mask, .. } = &mut self.state {
            if *present_values_mask >> delta != 0 {
                return false;
            }
            *present_values_mask |= 1 << delta;
        }
        true
    }

    pub fn end_enum(&mut self) {
        if let State::Enum { present_values_mask, .. } = self.state {
            if present_values_mask != 0 {
                self.flush_enum_mask();
            }
        }
    }

    pub fn encode_extension(&mut self, field_type: FieldType, number: u32, flags: u64) -> bool {
        self.reset_message(0);
        self.put_raw(version::EXTENSION);
        self.put_field(field_type, number, flags)
    }

    pub fn encode_map(&mut self, key: FieldType, val: FieldType, key_flags: u64, val_flags: u64) -> bool {
        self.reset_message(0);
        self.put_raw(version::MAP);
        self.put_field(key, 1, key_flags) && self.put_field(val, 2, val_flags)
    }

    pub fn encode_message_set(&mut self) {
        self.reset_message(0);
        self.put_raw(version::MESSAGE_SET);
    }
}

const fn encoded_type(t: FieldType) -> EncodedType {
    match t {
        FieldType::Double => EncodedType::Double,
        FieldType::Float => EncodedType::Float,
        FieldType::Int64 => EncodedType::Int64,
        FieldType::UInt64 => EncodedType::UInt64,
        FieldType::Int32 => EncodedType::Int32,
        FieldType::Fixed64 => EncodedType::Fixed64,
        FieldType::Fixed32 => EncodedType::Fixed32,
        FieldType::Bool => EncodedType::Bool,
        FieldType::String => EncodedType::String,
        FieldType::Group => EncodedType::Group,
        FieldType::Message => EncodedType::Message,
        FieldType::Bytes => EncodedType::Bytes,
        FieldType::UInt32 => EncodedType::UInt32,
        FieldType::Enum => EncodedType::OpenEnum,
        FieldType::SFixed32 => EncodedType::SFixed32,
        FieldType::SFixed64 => EncodedType::SFixed64,
        FieldType::SInt32 => EncodedType::SInt32,
        FieldType::SInt64 => EncodedType::SInt64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_message() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        assert!(e.put_field(FieldType::Int32, 1, 0));
        assert!(e.put_field(FieldType::String, 2, field_flags::VALIDATE_UTF8));
        // int32 is 6 -> '(', string is 15 -> '1', FlipValidateUtf8 -> 'N'
        assert_eq!(e.as_str(), "$(1N");
    }

    #[test]
    fn skips_and_repeated() {
        let mut e = MtDataEncoder::new();
        e.start_message(message_modifier::DEFAULT_IS_PACKED);
        assert!(e.put_field(FieldType::Int32, 4, field_flags::IS_REPEATED | field_flags::IS_PACKED));
        assert!(!e.put_field(FieldType::Int32, 4, 0));
        let s = e.finish();
        assert_eq!(s.as_bytes()[0], b'$');
        // DEFAULT_IS_PACKED modifier, then a skip of 4, then repeated int32.
        assert_eq!(s.as_bytes()[1], to_base92(idx(value::MIN_MODIFIER) as u8 + 2));
        assert_eq!(s.as_bytes()[2], to_base92(idx(value::MIN_SKIP) as u8 + 4));
        assert_eq!(s.as_bytes()[3], to_base92(26));
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn oneofs() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 1, 0);
        e.put_field(FieldType::Bytes, 2, 0);
        e.start_oneof();
        e.put_oneof_field(1);
        e.put_oneof_field(2);
        assert_eq!(e.as_str(), "$(0^!|#");
    }

    #[test]
    fn enums() {
        let mut e = MtDataEncoder::new();
        e.start_enum();
        for v in [0, 1, 2, 10] {
            assert!(e.put_enum_value(v));
        }
        assert!(!e.put_enum_value(3));
        e.end_enum();
        let s = e.finish();
        // mask 0b111 for 0..5, then mask 0b00001 shifted into 5..10 and 10.
        assert_eq!(s.as_bytes()[0], b'!');
        assert_eq!(s.as_bytes()[1], to_base92(7));
    }
}
