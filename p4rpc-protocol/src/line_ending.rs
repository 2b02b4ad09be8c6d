//! Line-ending modes and payload conversion.
//!
//! Text travels on the wire with bare LF terminators. A [`LineEnding`]
//! names the terminator a client file uses locally, plus the code-unit
//! layout of the content (single bytes or UTF-16 in either byte order),
//! and converts payloads between the two forms.

use crate::file_type::FileType;
use std::borrow::Cow;

/// Terminator written by the host platform for `Local` files.
#[cfg(windows)]
pub const NATIVE_TERMINATOR: &str = "\r\n";
/// Terminator written by the host platform for `Local` files.
#[cfg(not(windows))]
pub const NATIVE_TERMINATOR: &str = "\n";

/// Line terminator style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Terminator {
    /// Whatever the host platform uses.
    Local,
    Lf,
    Cr,
    CrLf,
    LfCrLf,
}

impl Terminator {
    pub const ALL: [Terminator; 5] = [
        Terminator::Local,
        Terminator::Lf,
        Terminator::Cr,
        Terminator::CrLf,
        Terminator::LfCrLf,
    ];

    /// The terminator as text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Terminator::Local => NATIVE_TERMINATOR,
            Terminator::Lf => "\n",
            Terminator::Cr => "\r",
            Terminator::CrLf => "\r\n",
            Terminator::LfCrLf => "\n\r\n",
        }
    }
}

/// Code-unit layout of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitLayout {
    Byte,
    Utf16Be,
    Utf16Le,
}

impl UnitLayout {
    pub const ALL: [UnitLayout; 3] = [UnitLayout::Byte, UnitLayout::Utf16Be, UnitLayout::Utf16Le];

    fn unit_len(&self) -> usize {
        match self {
            UnitLayout::Byte => 1,
            UnitLayout::Utf16Be | UnitLayout::Utf16Le => 2,
        }
    }

    /// Encodes text in this layout.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            UnitLayout::Byte => text.as_bytes().to_vec(),
            UnitLayout::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            UnitLayout::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        }
    }
}

/// A line-ending mode: terminator plus code-unit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineEnding {
    terminator: Terminator,
    layout: UnitLayout,
}

impl LineEnding {
    pub const LOCAL: LineEnding = LineEnding::new(Terminator::Local, UnitLayout::Byte);
    pub const LF: LineEnding = LineEnding::new(Terminator::Lf, UnitLayout::Byte);
    pub const CR: LineEnding = LineEnding::new(Terminator::Cr, UnitLayout::Byte);
    pub const CRLF: LineEnding = LineEnding::new(Terminator::CrLf, UnitLayout::Byte);
    pub const LFCRLF: LineEnding = LineEnding::new(Terminator::LfCrLf, UnitLayout::Byte);

    pub const fn new(terminator: Terminator, layout: UnitLayout) -> Self {
        Self { terminator, layout }
    }

    /// Same terminator in a different layout.
    pub const fn with_layout(self, layout: UnitLayout) -> Self {
        Self::new(self.terminator, layout)
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    pub fn layout(&self) -> UnitLayout {
        self.layout
    }

    /// Every mode, byte layouts first.
    pub fn all() -> impl Iterator<Item = LineEnding> {
        UnitLayout::ALL
            .into_iter()
            .flat_map(|layout| Terminator::ALL.into_iter().map(move |t| LineEnding::new(t, layout)))
    }

    /// Decodes the line-ending descriptor from a server type string.
    ///
    /// The second character is a hex digit: 1 = LF, 2 = CR, 3 = CRLF,
    /// 4 = LF-CR-LF. Anything else, including a missing descriptor, means
    /// local. Raw text always gets LF.
    pub fn from_descriptor(descriptor: Option<&str>, raw_text: bool) -> Self {
        if raw_text {
            return LineEnding::LF;
        }
        match descriptor
            .and_then(|d| d.chars().nth(1))
            .and_then(|c| c.to_digit(16))
        {
            Some(1) => LineEnding::LF,
            Some(2) => LineEnding::CR,
            Some(3) => LineEnding::CRLF,
            Some(4) => LineEnding::LFCRLF,
            _ => LineEnding::LOCAL,
        }
    }

    /// Decodes the descriptor carried in a file's type string.
    pub fn for_file(type_string: Option<&str>) -> Self {
        Self::from_descriptor(type_string, FileType::decode(type_string).is_raw_text())
    }

    /// Canonical bytes of this mode's terminator.
    pub fn bytes(&self) -> Vec<u8> {
        self.layout.encode(self.terminator.as_str())
    }

    /// Canonical bytes of the wire terminator (LF) in this mode's layout.
    pub fn wire_bytes(&self) -> Vec<u8> {
        self.layout.encode("\n")
    }

    /// Whether conversion can change the payload at all.
    pub fn needs_filtering(&self) -> bool {
        match self.terminator {
            Terminator::Lf => false,
            Terminator::Local => NATIVE_TERMINATOR != "\n",
            _ => true,
        }
    }

    /// Converts a payload from this mode to the wire form.
    pub fn to_wire<'a>(&self, payload: &'a [u8]) -> Cow<'a, [u8]> {
        if !self.needs_filtering() {
            return Cow::Borrowed(payload);
        }
        replace_units(payload, &self.bytes(), &self.wire_bytes(), self.layout.unit_len())
    }

    /// Converts a wire payload to this mode.
    pub fn to_local<'a>(&self, payload: &'a [u8]) -> Cow<'a, [u8]> {
        if !self.needs_filtering() {
            return Cow::Borrowed(payload);
        }
        replace_units(payload, &self.wire_bytes(), &self.bytes(), self.layout.unit_len())
    }
}

impl Default for LineEnding {
    fn default() -> Self {
        LineEnding::LOCAL
    }
}

/// Free-function form of [`LineEnding::from_descriptor`].
pub fn decode_line_ending(descriptor: Option<&str>, raw_text: bool) -> LineEnding {
    LineEnding::from_descriptor(descriptor, raw_text)
}

/// Replaces every unit-aligned occurrence of `from` with `to`.
fn replace_units<'a>(payload: &'a [u8], from: &[u8], to: &[u8], unit: usize) -> Cow<'a, [u8]> {
    if from == to || from.is_empty() {
        return Cow::Borrowed(payload);
    }

    let mut out: Option<Vec<u8>> = None;
    let mut i = 0;
    while i < payload.len() {
        if payload[i..].starts_with(from) {
            let buf = out.get_or_insert_with(|| {
                let mut v = Vec::with_capacity(payload.len() + payload.len() / 8);
                v.extend_from_slice(&payload[..i]);
                v
            });
            buf.extend_from_slice(to);
            i += from.len();
        } else {
            let end = (i + unit).min(payload.len());
            if let Some(buf) = out.as_mut() {
                buf.extend_from_slice(&payload[i..end]);
            }
            i = end;
        }
    }

    match out {
        Some(buf) => Cow::Owned(buf),
        None => Cow::Borrowed(payload),
    }
}
