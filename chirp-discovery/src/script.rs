use serde_json::Value;
use thiserror::Error;

const ENTRY_POINT: &str = "getHaDeviceInfo";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script is empty")]
    Empty,
    #[error("script defines no getHaDeviceInfo function")]
    MissingFunction,
    #[error("getHaDeviceInfo does not return an object literal")]
    MissingReturn,
    #[error("object literal returned by getHaDeviceInfo is not terminated")]
    Unterminated,
    #[error("invalid descriptor literal: {0}")]
    Parse(String),
    #[error("descriptor has no entities object")]
    MissingEntities,
}

/// Turns a device-profile codec script into its discovery descriptor.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, script: &str) -> Result<Value, ScriptError>;
}

/// Reads the object literal returned by `getHaDeviceInfo()` as data.
///
/// Nothing is executed: the literal is located by brace matching (aware of
/// strings and comments) and parsed as JSON5, which covers unquoted keys,
/// single-quoted strings, trailing commas and comments.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectLiteralEvaluator;

impl ScriptEvaluator for ObjectLiteralEvaluator {
    fn evaluate(&self, script: &str) -> Result<Value, ScriptError> {
        if script.trim().is_empty() {
            return Err(ScriptError::Empty);
        }
        let literal = descriptor_literal(script)?;
        let value: Value =
            json5::from_str(literal).map_err(|e| ScriptError::Parse(e.to_string()))?;
        match value.get("entities") {
            Some(Value::Object(_)) => Ok(value),
            _ => Err(ScriptError::MissingEntities),
        }
    }
}

fn descriptor_literal(script: &str) -> Result<&str, ScriptError> {
    let start = script.find(ENTRY_POINT).ok_or(ScriptError::MissingFunction)?;
    let after_entry = &script[start + ENTRY_POINT.len()..];
    let ret = after_entry.find("return").ok_or(ScriptError::MissingReturn)?;
    let body = &after_entry[ret + "return".len()..];
    let open = body.find('{').ok_or(ScriptError::MissingReturn)?;
    if !body[..open].trim().is_empty() {
        return Err(ScriptError::MissingReturn);
    }
    let literal = &body[open..];
    let end = balanced_end(literal).ok_or(ScriptError::Unterminated)?;
    Ok(&literal[..end])
}

/// Byte offset just past the brace closing the one at the start of `src`.
fn balanced_end(src: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut chars = src.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' | '\'' => loop {
                match chars.next()? {
                    (_, '\\') => {
                        chars.next()?;
                    }
                    (_, q) if q == c => break,
                    _ => {}
                }
            },
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                for (_, n) in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut star = false;
                loop {
                    let (_, n) = chars.next()?;
                    if star && n == '/' {
                        break;
                    }
                    star = n == '*';
                }
            }
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
