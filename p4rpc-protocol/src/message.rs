//! Server messages carried by `client-Message` packets.
//!
//! A message packet holds one or more `codeN`/`fmtN` pairs plus the named
//! arguments the format strings refer to. Codes pack several fields:
//!
//! ```text
//!  31..28    27..24   23..16    15..10     9..0
//! severity   args     generic   subsystem  sub-code
//! ```

use crate::result_map::ResultMap;
use serde::Serialize;
use std::fmt;

/// Message severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Empty,
    Info,
    Warn,
    Failed,
    Fatal,
}

impl Severity {
    fn from_bits(bits: u32) -> Self {
        match bits {
            0 => Severity::Empty,
            1 => Severity::Info,
            2 => Severity::Warn,
            3 => Severity::Failed,
            _ => Severity::Fatal,
        }
    }

    /// Failed and fatal messages fail the command.
    pub fn is_error(&self) -> bool {
        *self >= Severity::Failed
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Empty => "empty",
            Severity::Info => "info",
            Severity::Warn => "warning",
            Severity::Failed => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Packed server message code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageCode(pub u32);

impl MessageCode {
    /// Parses the decimal form sent on the wire. Servers may send the code
    /// as a signed 32-bit value; unparseable codes read as zero.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        s.parse::<u32>()
            .or_else(|_| s.parse::<i32>().map(|v| v as u32))
            .map(MessageCode)
            .unwrap_or(MessageCode(0))
    }

    pub fn severity(&self) -> Severity {
        Severity::from_bits((self.0 >> 28) & 0xf)
    }

    pub fn arg_count(&self) -> u32 {
        (self.0 >> 24) & 0xf
    }

    pub fn generic(&self) -> u32 {
        (self.0 >> 16) & 0xff
    }

    pub fn subsystem(&self) -> u32 {
        (self.0 >> 10) & 0x3f
    }

    pub fn sub_code(&self) -> u32 {
        self.0 & 0x3ff
    }

    /// Subsystem and sub-code combined; stable across severities.
    pub fn unique_code(&self) -> u32 {
        self.0 & 0xffff
    }
}

/// One decoded server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerMessage {
    pub code: MessageCode,
    pub severity: Severity,
    pub format: String,
    pub text: String,
}

impl ServerMessage {
    /// Builds a message and renders its text from `args`.
    pub fn new(code: MessageCode, format: impl Into<String>, args: &ResultMap) -> Self {
        let format = format.into();
        let text = interpolate(&format, |name| args.get_str(name));
        Self {
            code,
            severity: code.severity(),
            format,
            text,
        }
    }

    /// Extracts every `codeN`/`fmtN` pair from a flattened message packet.
    pub fn from_result_map(map: &ResultMap) -> Vec<Self> {
        (0..)
            .map_while(|i| {
                let code = map.get_str(&format!("code{i}"))?;
                let format = map.get_str(&format!("fmt{i}")).unwrap_or_default();
                Some(Self::new(MessageCode::parse(code), format, map))
            })
            .collect()
    }

    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Renders a server format string.
///
/// `[a|b]` picks whichever side has a non-empty `%arg%`, `[text %arg%]` is
/// dropped unless `arg` is set, `%arg%` is substituted, and `%'text'%`
/// becomes `text`. Unknown placeholders are left as they are.
pub fn interpolate<'a>(format: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    if !format.contains('%') && !format.contains('|') {
        return format.to_owned();
    }
    let resolved = resolve_alternatives(format, &lookup);
    substitute(&resolved, &lookup)
}

fn resolve_alternatives<'a>(format: &str, lookup: &impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open + 1..].find(|c| c == '[' || c == ']') else {
            break;
        };
        let close = open + 1 + close;
        if rest.as_bytes()[close] == b'[' {
            out.push_str(&rest[..close]);
            rest = &rest[close..];
            continue;
        }

        out.push_str(&rest[..open]);
        let inner = &rest[open + 1..close];

        if let Some((left, right)) = inner.split_once('|') {
            if right.contains('|') {
                // More than two alternatives; dropped entirely.
            } else if left.contains('%') {
                out.push_str(if has_value(left, lookup) { left } else { right });
            } else if right.contains('%') {
                out.push_str(if has_value(right, lookup) { right } else { left });
            } else {
                out.push('[');
                out.push_str(inner);
                out.push(']');
            }
        } else if has_value(inner, lookup) {
            out.push_str(inner);
        } else if !inner.contains('%') {
            out.push('[');
            out.push_str(inner);
            out.push(']');
        }

        rest = &rest[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Iterates over `%...%` placeholders as (start, end) byte ranges.
fn placeholders(s: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let start = pos + s[pos..].find('%')?;
        let end = start + 1 + s[start + 1..].find('%')? + 1;
        pos = end;
        Some((start, end))
    })
}

fn is_uniquote(placeholder: &str) -> bool {
    placeholder.len() >= 4
        && placeholder.as_bytes()[1] == b'\''
        && placeholder.as_bytes()[placeholder.len() - 2] == b'\''
}

fn has_value<'a>(s: &str, lookup: &impl Fn(&str) -> Option<&'a str>) -> bool {
    placeholders(s).any(|(start, end)| {
        let placeholder = &s[start..end];
        is_uniquote(placeholder)
            || lookup(&placeholder[1..placeholder.len() - 1]).is_some_and(|v| !v.is_empty())
    })
}

fn substitute<'a>(s: &str, lookup: &impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;

    for (start, end) in placeholders(s) {
        out.push_str(&s[last..start]);
        let placeholder = &s[start..end];
        if is_uniquote(placeholder) {
            out.push_str(&placeholder[2..placeholder.len() - 2]);
        } else {
            match lookup(&placeholder[1..placeholder.len() - 1]) {
                Some(value) => out.push_str(value),
                None => out.push_str(placeholder),
            }
        }
        last = end;
    }

    out.push_str(&s[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> ResultMap {
        let mut map = ResultMap::new();
        for (k, v) in pairs {
            map.insert(k, *v);
        }
        map
    }

    #[test]
    fn test_code_fields() {
        // A warning with one argument.
        let code = MessageCode::parse("554768772");
        assert_eq!(code.severity(), Severity::Warn);
        assert_eq!(code.arg_count(), 1);
        assert_eq!(code.generic(), 17);
        assert_eq!(code.subsystem(), 6);
        assert_eq!(code.sub_code(), 388);
    }

    #[test]
    fn test_code_parse_signed_and_garbage() {
        assert_eq!(MessageCode::parse("-1").0, u32::MAX);
        assert_eq!(MessageCode::parse("-1").severity(), Severity::Fatal);
        assert_eq!(MessageCode::parse("nope").severity(), Severity::Empty);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Fatal.is_error());
        assert!(Severity::Failed.is_error());
        assert!(!Severity::Warn.is_error());
        assert!(Severity::Info < Severity::Warn);
    }

    #[test]
    fn test_substitution() {
        let map = args(&[("depotFile", "//depot/a.c"), ("rev", "3")]);
        let text = interpolate("%depotFile%#%rev% - updating", |k| map.get_str(k));
        assert_eq!(text, "//depot/a.c#3 - updating");
    }

    #[test]
    fn test_uniquote_and_unknown() {
        let map = ResultMap::new();
        let text = interpolate("%'literal'% and %missing%", |k| map.get_str(k));
        assert_eq!(text, "literal and %missing%");
    }

    #[test]
    fn test_alternatives() {
        let with = args(&[("change", "12")]);
        let without = ResultMap::new();
        let format = "Change [%change%|default] submitted.";
        assert_eq!(interpolate(format, |k| with.get_str(k)), "Change 12 submitted.");
        assert_eq!(interpolate(format, |k| without.get_str(k)), "Change default submitted.");

        let optional = "%path%[ (%note%)]";
        let map = args(&[("path", "a.c")]);
        assert_eq!(interpolate(optional, |k| map.get_str(k)), "a.c");
        let map = args(&[("path", "a.c"), ("note", "new")]);
        assert_eq!(interpolate(optional, |k| map.get_str(k)), "a.c (new)");

        // Brackets without placeholders are literal.
        let map = ResultMap::new();
        assert_eq!(interpolate("[x] %'y'%", |k| map.get_str(k)), "[x] y");
    }

    #[test]
    fn test_from_result_map() {
        let map = args(&[
            ("code0", "822150148"),
            ("fmt0", "%client% not changed."),
            ("client", "ws"),
            ("code1", "554768772"),
            ("fmt1", "second"),
        ]);
        let messages = ServerMessage::from_result_map(&map);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "ws not changed.");
        assert_eq!(messages[0].severity, Severity::Failed);
        assert!(messages[0].is_error());
        assert_eq!(messages[1].severity, Severity::Warn);
    }
}
