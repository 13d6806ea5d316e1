//! GDB/MI output parser.
//!
//! `MiParser` is push-driven: `feed` accepts raw bytes from the debugger's
//! stdout and emits every record completed by those bytes. A newline only
//! terminates a record when it falls outside a quoted string, so the scanner
//! tracks string/escape state across feeds and partial trailing data is
//! buffered until the next call. Malformed lines are logged and skipped; the
//! scanner resynchronizes at the next newline.

use crate::types::{
    AsyncKind, AsyncRecord, MiRecord, ResultClass, ResultRecord, StreamKind, StreamRecord, Value,
};
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

type ParseResult<T> = Result<T, String>;

/// Push-driven MI record scanner. No global state; one per input stream.
#[derive(Debug, Default)]
pub struct MiParser {
    line: Vec<u8>,
    in_string: bool,
    escaped: bool,
}

impl MiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of bytes, returning every record completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<MiRecord> {
        let mut records = Vec::new();

        for &b in bytes {
            if b == b'\n' && !self.in_string {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.escaped = false;

                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match parse_line(text) {
                    Ok(record) => records.push(record),
                    Err(e) => log::warn!("discarding malformed MI line {text:?}: {e}"),
                }
                continue;
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
            } else if b == b'"' {
                self.in_string = true;
            }
            self.line.push(b);
        }

        records
    }
}

/// Parse one complete MI output line.
pub fn parse_line(line: &str) -> ParseResult<MiRecord> {
    if line == "(gdb)" {
        return Ok(MiRecord::Prompt);
    }

    // Optional numeric token before `^` and `*`.
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let token: Option<u32> = if digits > 0 {
        line[..digits].parse().ok()
    } else {
        None
    };
    let rest = &line[digits..];

    let mut chars = rest.chars().peekable();
    match chars.next() {
        Some('^') => {
            let (class, fields) = parse_classed_body(&mut chars)?;
            let class = ResultClass::parse(&class)
                .ok_or_else(|| format!("unknown result class `{class}`"))?;
            Ok(MiRecord::Result(ResultRecord {
                token,
                class,
                fields,
            }))
        }
        Some('*') => parse_async_body(AsyncKind::Exec, &mut chars),
        Some('=') if digits == 0 => parse_async_body(AsyncKind::Notify, &mut chars),
        Some('+') if digits == 0 => parse_async_body(AsyncKind::Status, &mut chars),
        Some(sigil @ ('~' | '@' | '&')) if digits == 0 => {
            let kind = match sigil {
                '~' => StreamKind::Console,
                '@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            let text = parse_quoted(&mut chars)?;
            Ok(MiRecord::Stream(StreamRecord { kind, text }))
        }
        _ => Err("unrecognized record prefix".into()),
    }
}

fn parse_async_body(kind: AsyncKind, chars: &mut Peekable<Chars>) -> ParseResult<MiRecord> {
    let (class, fields) = parse_classed_body(chars)?;
    Ok(MiRecord::Async(AsyncRecord {
        kind,
        class,
        fields,
    }))
}

/// `class ("," result)*` — shared by result and async records.
fn parse_classed_body(chars: &mut Peekable<Chars>) -> ParseResult<(String, HashMap<String, Value>)> {
    let class = parse_identifier(chars)?;
    let fields = if chars.peek() == Some(&',') {
        chars.next();
        parse_fields(chars)?
    } else {
        HashMap::new()
    };
    if chars.peek().is_some() {
        return Err("trailing data after record".into());
    }
    Ok((class, fields))
}

fn parse_fields(chars: &mut Peekable<Chars>) -> ParseResult<HashMap<String, Value>> {
    let mut fields = HashMap::new();
    loop {
        let key = parse_identifier(chars)?;
        if chars.next() != Some('=') {
            return Err(format!("expected `=` after `{key}`"));
        }
        let value = parse_value(chars)?;
        fields.insert(key, value);

        match chars.peek() {
            Some(',') => {
                chars.next();
            }
            _ => break,
        }
    }
    Ok(fields)
}

fn parse_identifier(chars: &mut Peekable<Chars>) -> ParseResult<String> {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' || c == '-' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if ident.is_empty() {
        return Err("empty identifier".into());
    }
    Ok(ident)
}

fn parse_value(chars: &mut Peekable<Chars>) -> ParseResult<Value> {
    match chars.peek() {
        Some('"') => Ok(Value::String(parse_quoted(chars)?)),
        Some('{') => parse_tuple(chars),
        Some('[') => parse_list(chars),
        _ => {
            // Bare value, tolerated the way GDB sometimes emits them.
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' || c == ']' || c == '}' {
                    break;
                }
                text.push(c);
                chars.next();
            }
            if text.is_empty() {
                return Err("empty value".into());
            }
            Ok(Value::String(text))
        }
    }
}

fn parse_tuple(chars: &mut Peekable<Chars>) -> ParseResult<Value> {
    chars.next(); // `{`
    let mut tuple = HashMap::new();
    if chars.peek() == Some(&'}') {
        chars.next();
        return Ok(Value::Tuple(tuple));
    }
    loop {
        let key = parse_identifier(chars)?;
        if chars.next() != Some('=') {
            return Err("expected `=` in tuple".into());
        }
        tuple.insert(key, parse_value(chars)?);
        match chars.next() {
            Some(',') => continue,
            Some('}') => break,
            _ => return Err("unterminated tuple".into()),
        }
    }
    Ok(Value::Tuple(tuple))
}

/// Lists come in two shapes: `[value,...]` and `[name=value,...]`. The
/// second keeps its names (`ResultList`) so callers can tell
/// `stack=[frame={...},...]` elements apart from anonymous ones.
fn parse_list(chars: &mut Peekable<Chars>) -> ParseResult<Value> {
    chars.next(); // `[`
    let mut named: Vec<(String, Value)> = Vec::new();
    let mut anonymous: Vec<Value> = Vec::new();

    if chars.peek() == Some(&']') {
        chars.next();
        return Ok(Value::List(anonymous));
    }
    loop {
        match chars.peek() {
            Some('"' | '{' | '[') => anonymous.push(parse_value(chars)?),
            _ => {
                let word = parse_identifier(chars)?;
                if chars.peek() == Some(&'=') {
                    chars.next();
                    named.push((word, parse_value(chars)?));
                } else {
                    anonymous.push(Value::String(word));
                }
            }
        }
        match chars.next() {
            Some(',') => continue,
            Some(']') => break,
            _ => return Err("unterminated list".into()),
        }
    }

    if named.is_empty() {
        Ok(Value::List(anonymous))
    } else {
        Ok(Value::ResultList(named))
    }
}

/// Consume a quoted c-string, decoding escapes.
fn parse_quoted(chars: &mut Peekable<Chars>) -> ParseResult<String> {
    if chars.next() != Some('"') {
        return Err("expected opening quote".into());
    }
    let mut text = String::new();
    loop {
        match chars.next() {
            None => return Err("unterminated string".into()),
            Some('"') => break,
            Some('\\') => match chars.next() {
                None => return Err("trailing backslash".into()),
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('r') => text.push('\r'),
                Some('\\') => text.push('\\'),
                Some('"') => text.push('"'),
                Some('\'') => text.push('\''),
                Some('f') => text.push('\u{0C}'),
                Some('v') => text.push('\u{0B}'),
                Some('a') => text.push('\u{07}'),
                Some('b') => text.push('\u{08}'),
                Some('x') => {
                    let mut value: u32 = 0;
                    let mut seen = 0;
                    while seen < 2 {
                        match chars.peek().and_then(|c| c.to_digit(16)) {
                            Some(d) => {
                                value = value * 16 + d;
                                chars.next();
                                seen += 1;
                            }
                            None => break,
                        }
                    }
                    if seen == 0 {
                        return Err("`\\x` without hex digits".into());
                    }
                    text.push((value & 0xFF) as u8 as char);
                }
                Some(d @ '0'..='7') => {
                    let mut value = d.to_digit(8).unwrap();
                    let mut seen = 1;
                    while seen < 3 {
                        match chars.peek().and_then(|c| c.to_digit(8)) {
                            Some(d) => {
                                value = value * 8 + d;
                                chars.next();
                                seen += 1;
                            }
                            None => break,
                        }
                    }
                    text.push((value & 0xFF) as u8 as char);
                }
                Some(other) => {
                    // Unknown escape: preserve verbatim.
                    text.push('\\');
                    text.push(other);
                }
            },
            Some(c) => text.push(c),
        }
    }
    Ok(text)
}

/// Decode a complete quoted c-string, e.g. `"a\tb"` -> `a<TAB>b`.
pub fn decode_c_string(input: &str) -> ParseResult<String> {
    let mut chars = input.chars().peekable();
    let text = parse_quoted(&mut chars)?;
    if chars.peek().is_some() {
        return Err("trailing data after string".into());
    }
    Ok(text)
}

/// Encode text as a quoted MI c-string, for embedding paths and expressions
/// in commands.
pub fn encode_c_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
