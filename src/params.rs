//! Statement parameters.
//!
//! SQL text names its parameters as `@name`. [`Statement::prepare`] rewrites the
//! text into the backend's positional placeholders and orders the bound values
//! to match.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::backend::Backend;
use crate::{Error, Result};

/// A single bindable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    fn try_from(v: serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;

        Ok(match v {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if n.is_u64() {
                    return Err(Error::InvalidParameters(format!(
                        "{n} does not fit in a signed 64-bit integer"
                    )));
                } else {
                    // as_f64 is always Some for non-integer numbers
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::Text(s),
            // Nested values are stored as their JSON text.
            nested @ (Json::Array(_) | Json::Object(_)) => Value::Text(nested.to_string()),
        })
    }
}

/// Named parameter values, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, Value)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, replacing any existing one with the same name.
    ///
    /// Names may be given with or without the leading `@` and match
    /// ASCII case-insensitively.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let name = name.strip_prefix('@').map(str::to_string).unwrap_or(name);
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Build parameters from the fields of a serializable struct or map.
    pub fn from_object<S: Serialize + ?Sized>(object: &S) -> Result<Self> {
        let json = serde_json::to_value(object)
            .map_err(|e| Error::InvalidParameters(e.to_string()))?;
        let serde_json::Value::Object(fields) = json else {
            return Err(Error::InvalidParameters(
                "parameter object must serialize to a map of named fields".to_string(),
            ));
        };

        let mut params = Params::new();
        for (name, value) in fields {
            params.insert(name, Value::try_from(value)?);
        }
        Ok(params)
    }
}

/// Anything accepted as the parameters of a statement.
pub trait IntoParams {
    fn into_params(self) -> Result<Params>;
}

impl IntoParams for () {
    fn into_params(self) -> Result<Params> {
        Ok(Params::new())
    }
}

impl IntoParams for Params {
    fn into_params(self) -> Result<Params> {
        Ok(self)
    }
}

impl IntoParams for &Params {
    fn into_params(self) -> Result<Params> {
        Ok(self.clone())
    }
}

impl<K, V> IntoParams for Vec<(K, V)>
where
    K: Into<String>,
    V: Into<Value>,
{
    fn into_params(self) -> Result<Params> {
        let mut params = Params::new();
        for (name, value) in self {
            params.insert(name, value);
        }
        Ok(params)
    }
}

impl<V: Into<Value>> IntoParams for HashMap<String, V> {
    fn into_params(self) -> Result<Params> {
        let mut params = Params::new();
        for (name, value) in self {
            params.insert(name, value);
        }
        Ok(params)
    }
}

impl IntoParams for serde_json::Value {
    fn into_params(self) -> Result<Params> {
        Params::from_object(&self)
    }
}

/// SQL rewritten for a backend together with its positional values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    values: Vec<Value>,
}

impl Statement {
    pub fn prepare<DB: Backend>(sql: &str, params: &Params) -> Result<Self> {
        let (sql, values) = bind_named(sql, params, DB::placeholder)?;
        Ok(Self { sql, values })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

fn bind_named(
    sql: &str,
    params: &Params,
    placeholder: fn(usize) -> String,
) -> Result<(String, Vec<Value>)> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<&str> = Vec::new();
    let mut values = Vec::new();
    let mut state = State::Normal;
    let mut copied = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => {
                    state = State::SingleQuoted;
                    idx += 1;
                }
                b'"' => {
                    state = State::DoubleQuoted;
                    idx += 1;
                }
                b'-' if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 2;
                }
                b'/' if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 2;
                }
                b'$' => match try_start_dollar_quote(bytes, idx) {
                    Some((tag, end)) => {
                        state = State::DollarQuoted(tag);
                        idx = end + 1;
                    }
                    None => idx += 1,
                },
                // `@@` is an operator or a system variable, never a parameter.
                b'@' if bytes.get(idx + 1) == Some(&b'@') => idx += 2,
                b'@' => match scan_identifier(bytes, idx + 1) {
                    Some(end) => {
                        let name = &sql[idx + 1..end];
                        let position = match names
                            .iter()
                            .position(|seen| seen.eq_ignore_ascii_case(name))
                        {
                            Some(pos) => pos + 1,
                            None => {
                                let value = params
                                    .get(name)
                                    .ok_or_else(|| Error::MissingParameter(name.to_string()))?;
                                names.push(name);
                                values.push(value.clone());
                                names.len()
                            }
                        };
                        out.push_str(&sql[copied..idx]);
                        out.push_str(&placeholder(position));
                        idx = end;
                        copied = end;
                    }
                    None => idx += 1,
                },
                _ => idx += 1,
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    state = State::Normal;
                }
                idx += 1;
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    state = State::Normal;
                }
                idx += 1;
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
                idx += 1;
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 2;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 2;
                } else {
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    idx += tag.len() + 2;
                    state = State::Normal;
                } else {
                    idx += 1;
                }
            }
        }
    }

    out.push_str(&sql[copied..]);
    Ok((out, values))
}

fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// Returns the tag and the index of the closing `$` of an opening `$tag$`.
fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphabetic() || b == b'_' || (idx > start + 1 && b.is_ascii_digit())) {
            return None;
        }
        idx += 1;
    }

    if idx < bytes.len() {
        let tag = String::from_utf8(bytes[start + 1..idx].to_vec()).ok()?;
        Some((tag, idx))
    } else {
        None
    }
}

fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    end < bytes.len() && &bytes[idx + 1..end] == tag.as_bytes() && bytes[end] == b'$'
}

/// End index of the identifier starting at `start`, if one does.
fn scan_identifier(bytes: &[u8], start: usize) -> Option<usize> {
    match bytes.get(start) {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return None,
    }
    let mut idx = start + 1;
    while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_') {
        idx += 1;
    }
    Some(idx)
}
