/// `scripting/marshal.rs` — boundary value conversion
///
/// Everything that crosses between the host and a plugin VM is one of the
/// `ScriptValue` shapes. Strings are copied in both directions and
/// normalized to UTF-8 (lossy, Lua strings are byte strings); nothing
/// shared or mutable ever crosses the boundary.
///
/// Decode failures are ordinary values here — the bridge turns them into a
/// silent nil return, never a Lua error (see `api.rs`).
use std::fmt;

use mlua::{Lua, Result as LuaResult, Value};

/// Closed union of every value shape the bridge passes across the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    StrList(Vec<String>),
    PairList(Vec<(String, String)>),
}

/// Expected shape for `decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Bool,
    Int,
    Str,
    /// String or nil — nil decodes to `ScriptValue::Nil`, never an error.
    OptStr,
    StrList,
    PairList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// Value was not of the expected shape.
    Shape { expected: Shape, got: &'static str },
    /// A pair-list element was not a two-element sequence.
    BadPair { len: usize },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalError::Shape { expected, got } => {
                write!(f, "expected {expected:?}, got {got}")
            }
            MarshalError::BadPair { len } => {
                write!(f, "argument pair has {len} elements, expected 2")
            }
        }
    }
}

impl std::error::Error for MarshalError {}

/// Decode a Lua value against an expected shape.
pub fn decode(value: &Value, shape: Shape) -> Result<ScriptValue, MarshalError> {
    match shape {
        Shape::Bool => decode_bool(value).map(ScriptValue::Bool),
        Shape::Int => decode_int(value).map(ScriptValue::Int),
        Shape::Str => decode_str(value).map(ScriptValue::Str),
        Shape::OptStr => Ok(match decode_opt_str(value)? {
            Some(s) => ScriptValue::Str(s),
            None => ScriptValue::Nil,
        }),
        Shape::StrList => decode_str_list(value).map(ScriptValue::StrList),
        Shape::PairList => decode_pair_list(value).map(ScriptValue::PairList),
    }
}

/// Encode a native value into the plugin VM's representation.
/// Total — every `ScriptValue` is representable in Lua.
pub fn encode(value: &ScriptValue, lua: &Lua) -> LuaResult<Value> {
    match value {
        ScriptValue::Nil => Ok(Value::Nil),
        ScriptValue::Bool(b) => Ok(Value::Boolean(*b)),
        ScriptValue::Int(i) => Ok(Value::Integer(*i)),
        ScriptValue::Str(s) => Ok(Value::String(lua.create_string(s)?)),
        ScriptValue::StrList(items) => {
            let tbl = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                tbl.set(i + 1, item.as_str())?;
            }
            Ok(Value::Table(tbl))
        }
        ScriptValue::PairList(pairs) => {
            let tbl = lua.create_table()?;
            for (i, (a, b)) in pairs.iter().enumerate() {
                let pair = lua.create_table()?;
                pair.set(1, a.as_str())?;
                pair.set(2, b.as_str())?;
                tbl.set(i + 1, pair)?;
            }
            Ok(Value::Table(tbl))
        }
    }
}

pub fn decode_bool(value: &Value) -> Result<bool, MarshalError> {
    match value {
        Value::Boolean(b) => Ok(*b),
        other => Err(shape_err(Shape::Bool, other)),
    }
}

// Exact integers only — no float truncation, matching the strictness of the
// typed settings accessors.
pub fn decode_int(value: &Value) -> Result<i64, MarshalError> {
    match value {
        Value::Integer(i) => Ok(*i),
        other => Err(shape_err(Shape::Int, other)),
    }
}

pub fn decode_str(value: &Value) -> Result<String, MarshalError> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        other => Err(shape_err(Shape::Str, other)),
    }
}

/// Nil decodes to `None`; never an error for absent values.
pub fn decode_opt_str(value: &Value) -> Result<Option<String>, MarshalError> {
    match value {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s.to_string_lossy().to_string())),
        other => Err(shape_err(Shape::OptStr, other)),
    }
}

/// Homogeneous string sequence; each element decoded independently.
pub fn decode_str_list(value: &Value) -> Result<Vec<String>, MarshalError> {
    let tbl = match value {
        Value::Table(t) => t,
        other => return Err(shape_err(Shape::StrList, other)),
    };
    let mut items = Vec::new();
    for entry in tbl.clone().sequence_values::<Value>() {
        let entry = entry.map_err(|_| shape_err(Shape::StrList, value))?;
        items.push(decode_str(&entry)?);
    }
    Ok(items)
}

/// Sequence of exactly-two-element string pairs. Any element of the wrong
/// length fails the whole list — the caller must not partially apply it.
pub fn decode_pair_list(value: &Value) -> Result<Vec<(String, String)>, MarshalError> {
    let tbl = match value {
        Value::Table(t) => t,
        other => return Err(shape_err(Shape::PairList, other)),
    };
    let mut pairs = Vec::new();
    for entry in tbl.clone().sequence_values::<Value>() {
        let entry = entry.map_err(|_| shape_err(Shape::PairList, value))?;
        let pair = match &entry {
            Value::Table(t) => t,
            other => return Err(shape_err(Shape::PairList, other)),
        };
        let len = pair.raw_len();
        if len != 2 {
            return Err(MarshalError::BadPair { len });
        }
        let first: Value = pair.get(1).map_err(|_| shape_err(Shape::PairList, &entry))?;
        let second: Value = pair.get(2).map_err(|_| shape_err(Shape::PairList, &entry))?;
        pairs.push((decode_str(&first)?, decode_str(&second)?));
    }
    Ok(pairs)
}

fn shape_err(expected: Shape, got: &Value) -> MarshalError {
    MarshalError::Shape {
        expected,
        got: got.type_name(),
    }
}
