//! Text codecs and the per-connection charset context.
//!
//! Each Perforce charset name (`utf8`, `shiftjis`, `winansi`, ...) resolves
//! to a [`TextCodec`]. Codecs never substitute replacement characters:
//! anything that cannot be decoded or represented is a [`CharsetError`].

use crate::error::CharsetError;
use crate::line_ending::{LineEnding, UnitLayout};
use crate::utf8;
use encoding_rs::{EncoderResult, Encoding};
use std::fmt;
use std::sync::Arc;

/// Converts between bytes in one charset and Rust strings.
pub trait TextCodec: fmt::Debug + Send + Sync {
    /// Canonical name of the underlying encoding.
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError>;

    fn encode(&self, text: &str) -> Result<Vec<u8>, CharsetError>;

    /// Code-unit layout of encoded text.
    fn layout(&self) -> UnitLayout {
        UnitLayout::Byte
    }

    /// Whether encoded text starts with a byte-order mark.
    fn bom(&self) -> bool {
        false
    }
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// UTF-8, validated with the strict state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec {
    /// Strip a leading byte-order mark on decode and write one on encode.
    pub bom: bool,
}

impl TextCodec for Utf8Codec {
    fn name(&self) -> &'static str {
        if self.bom {
            "UTF-8 (BOM)"
        } else {
            "UTF-8"
        }
    }

    fn bom(&self) -> bool {
        self.bom
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError> {
        let bytes = if self.bom {
            bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
        } else {
            bytes
        };
        utf8::decode(bytes).map(str::to_owned)
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, CharsetError> {
        let mut out = Vec::with_capacity(text.len() + 3);
        if self.bom {
            out.extend_from_slice(UTF8_BOM);
        }
        out.extend_from_slice(text.as_bytes());
        Ok(out)
    }
}

/// Single- and multi-byte legacy charsets backed by `encoding_rs`.
#[derive(Debug, Clone, Copy)]
pub struct LegacyCodec {
    encoding: &'static Encoding,
}

impl LegacyCodec {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self { encoding }
    }
}

impl TextCodec for LegacyCodec {
    fn name(&self) -> &'static str {
        self.encoding.name()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError> {
        self.encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
            .ok_or(CharsetError::Undecodable {
                charset: self.encoding.name(),
            })
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, CharsetError> {
        let mut encoder = self.encoding.new_encoder();
        let capacity = encoder
            .max_buffer_length_from_utf8_without_replacement(text.len())
            .unwrap_or(text.len() * 4);
        let mut out = vec![0u8; capacity.max(1)];
        let mut read = 0;
        let mut written = 0;

        loop {
            let (result, r, w) = encoder.encode_from_utf8_without_replacement(
                &text[read..],
                &mut out[written..],
                true,
            );
            read += r;
            written += w;
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => out.resize(out.len() * 2, 0),
                EncoderResult::Unmappable(ch) => {
                    return Err(CharsetError::Unmappable {
                        charset: self.encoding.name(),
                        ch,
                    })
                }
            }
        }

        out.truncate(written);
        Ok(out)
    }
}

/// UTF-16 in an explicit byte order.
///
/// `encoding_rs` decodes UTF-16 but only encodes to UTF-8, so both
/// directions are done here.
#[derive(Debug, Clone, Copy)]
pub struct Utf16Codec {
    pub big_endian: bool,
    /// Write a byte-order mark on encode. A leading mark is always honoured
    /// on decode.
    pub bom: bool,
}

impl TextCodec for Utf16Codec {
    fn name(&self) -> &'static str {
        if self.big_endian {
            "UTF-16BE"
        } else {
            "UTF-16LE"
        }
    }

    fn layout(&self) -> UnitLayout {
        if self.big_endian {
            UnitLayout::Utf16Be
        } else {
            UnitLayout::Utf16Le
        }
    }

    fn bom(&self) -> bool {
        self.bom
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError> {
        if bytes.len() % 2 != 0 {
            return Err(CharsetError::OddLength {
                charset: self.name(),
                len: bytes.len(),
            });
        }

        let (big_endian, body) = match bytes {
            [0xFE, 0xFF, rest @ ..] => (true, rest),
            [0xFF, 0xFE, rest @ ..] => (false, rest),
            _ => (self.big_endian, bytes),
        };

        let units = body.chunks_exact(2).map(|pair| {
            let pair = [pair[0], pair[1]];
            if big_endian {
                u16::from_be_bytes(pair)
            } else {
                u16::from_le_bytes(pair)
            }
        });

        char::decode_utf16(units)
            .collect::<Result<String, _>>()
            .map_err(|_| CharsetError::Undecodable {
                charset: self.name(),
            })
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, CharsetError> {
        let mut out = Vec::with_capacity(text.len() * 2 + 2);
        if self.bom {
            out.extend_from_slice(&self.layout().encode("\u{FEFF}"));
        }
        out.extend_from_slice(&self.layout().encode(text));
        Ok(out)
    }
}

/// Wraps a codec and swaps specific code points after decode and before
/// encode.
#[derive(Debug, Clone)]
pub struct RemappedCodec {
    inner: Arc<dyn TextCodec>,
    /// `(as decoded by inner, as seen by callers)`
    table: &'static [(char, char)],
}

/// Shift-JIS wave dash and double vertical line, mapped to the forms
/// Windows code page 932 produces.
pub const SHIFTJIS_REMAP: &[(char, char)] = &[('\u{301C}', '\u{FF5E}'), ('\u{2016}', '\u{2225}')];

/// The reverse of [`SHIFTJIS_REMAP`]. `encoding_rs` decodes 0x8160/0x8161
/// to the code page 932 forms and cannot encode the JIS X 0208 ones, so the
/// plain `shiftjis` codec reports JIS forms and accepts both on encode.
pub const SHIFTJIS_JIS_FORMS: &[(char, char)] =
    &[('\u{FF5E}', '\u{301C}'), ('\u{2225}', '\u{2016}')];

impl RemappedCodec {
    pub fn new(inner: Arc<dyn TextCodec>, table: &'static [(char, char)]) -> Self {
        Self { inner, table }
    }

    fn swap(text: String, pairs: impl Iterator<Item = (char, char)> + Clone) -> String {
        if !text.chars().any(|c| pairs.clone().any(|(from, _)| from == c)) {
            return text;
        }
        text.chars()
            .map(|c| {
                pairs
                    .clone()
                    .find(|(from, _)| *from == c)
                    .map_or(c, |(_, to)| to)
            })
            .collect()
    }
}

impl TextCodec for RemappedCodec {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn layout(&self) -> UnitLayout {
        self.inner.layout()
    }

    fn bom(&self) -> bool {
        self.inner.bom()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError> {
        let text = self.inner.decode(bytes)?;
        Ok(Self::swap(text, self.table.iter().copied()))
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, CharsetError> {
        let text = Self::swap(
            text.to_owned(),
            self.table.iter().map(|&(inner, outer)| (outer, inner)),
        );
        self.inner.encode(&text)
    }
}

/// Perforce charset names accepted by [`codec_for`].
pub const CHARSET_NAMES: &[&str] = &[
    "none",
    "utf8",
    "utf8-bom",
    "iso8859-1",
    "iso8859-5",
    "iso8859-7",
    "iso8859-15",
    "shiftjis",
    "eucjp",
    "euckr",
    "winansi",
    "cp1251",
    "cp1253",
    "cp936",
    "cp949",
    "cp950",
    "koi8-r",
    "utf16",
    "utf16le",
    "utf16be",
    "utf16-nobom",
    "utf16le-bom",
    "utf16be-bom",
];

/// Resolves a Perforce charset name to a codec.
///
/// `shiftjis_remap` wraps the `shiftjis` codec in [`RemappedCodec`]; it has
/// no effect on other charsets.
pub fn codec_for(name: &str, shiftjis_remap: bool) -> Result<Arc<dyn TextCodec>, CharsetError> {
    let legacy = |encoding| -> Arc<dyn TextCodec> { Arc::new(LegacyCodec::new(encoding)) };
    let utf16 = |big_endian, bom| -> Arc<dyn TextCodec> { Arc::new(Utf16Codec { big_endian, bom }) };

    let codec: Arc<dyn TextCodec> = match name.to_ascii_lowercase().as_str() {
        "" | "none" | "auto" | "utf8" | "utf-8" => Arc::new(Utf8Codec { bom: false }),
        "utf8-bom" => Arc::new(Utf8Codec { bom: true }),
        // WHATWG maps latin-1 labels to windows-1252, a strict superset.
        "iso8859-1" | "winansi" => legacy(encoding_rs::WINDOWS_1252),
        "iso8859-5" => legacy(encoding_rs::ISO_8859_5),
        "iso8859-7" => legacy(encoding_rs::ISO_8859_7),
        "iso8859-15" => legacy(encoding_rs::ISO_8859_15),
        "shiftjis" => {
            let base: Arc<dyn TextCodec> = Arc::new(RemappedCodec::new(
                legacy(encoding_rs::SHIFT_JIS),
                SHIFTJIS_JIS_FORMS,
            ));
            if shiftjis_remap {
                Arc::new(RemappedCodec::new(base, SHIFTJIS_REMAP))
            } else {
                base
            }
        }
        "eucjp" => legacy(encoding_rs::EUC_JP),
        "euckr" | "cp949" => legacy(encoding_rs::EUC_KR),
        "cp1251" => legacy(encoding_rs::WINDOWS_1251),
        "cp1253" => legacy(encoding_rs::WINDOWS_1253),
        "cp936" => legacy(encoding_rs::GBK),
        "cp950" => legacy(encoding_rs::BIG5),
        "koi8-r" => legacy(encoding_rs::KOI8_R),
        "utf16" | "utf16le-bom" => utf16(false, true),
        "utf16le" | "utf16-nobom" => utf16(false, false),
        "utf16be" => utf16(true, false),
        "utf16be-bom" => utf16(true, true),
        _ => return Err(CharsetError::UnknownCharset(name.to_string())),
    };
    Ok(codec)
}

/// Wire and local charsets for one connection.
///
/// Built once from configuration and shared read-only between the
/// connection and its commands.
#[derive(Debug, Clone)]
pub struct CharsetContext {
    wire: Arc<dyn TextCodec>,
    local: Arc<dyn TextCodec>,
    local_line_ending: LineEnding,
    needs_transform: bool,
}

impl CharsetContext {
    pub fn new(
        wire: Arc<dyn TextCodec>,
        local: Arc<dyn TextCodec>,
        local_line_ending: LineEnding,
    ) -> Self {
        let wire_lf = wire.encode("\n").ok();
        let local_terminator = local.encode(local_line_ending.terminator().as_str()).ok();
        let needs_transform = wire_lf.is_none() || wire_lf != local_terminator;

        Self {
            wire,
            local,
            local_line_ending,
            needs_transform,
        }
    }

    /// Resolves both charsets by Perforce name.
    pub fn from_names(
        wire: &str,
        local: &str,
        shiftjis_remap: bool,
        local_line_ending: LineEnding,
    ) -> Result<Self, CharsetError> {
        Ok(Self::new(
            codec_for(wire, shiftjis_remap)?,
            codec_for(local, shiftjis_remap)?,
            local_line_ending,
        ))
    }

    /// UTF-8 on both sides with the platform's line endings.
    pub fn utf8() -> Self {
        Self::new(
            Arc::new(Utf8Codec::default()),
            Arc::new(Utf8Codec::default()),
            LineEnding::LOCAL,
        )
    }

    pub fn wire(&self) -> &dyn TextCodec {
        self.wire.as_ref()
    }

    pub fn local(&self) -> &dyn TextCodec {
        self.local.as_ref()
    }

    pub fn local_line_ending(&self) -> LineEnding {
        self.local_line_ending
    }

    /// True when the wire LF bytes differ from the local terminator bytes.
    pub fn needs_transform(&self) -> bool {
        self.needs_transform
    }

    fn same_charset(&self) -> bool {
        self.wire.name() == self.local.name() && self.wire.bom() == self.local.bom()
    }

    /// Converts local file content to wire form: local charset to wire
    /// charset, `mode` terminators to LF.
    pub fn to_wire_text(&self, local: &[u8], mode: LineEnding) -> Result<Vec<u8>, CharsetError> {
        if self.same_charset() {
            return Ok(mode.with_layout(self.local.layout()).to_wire(local).into_owned());
        }
        let text = self.local.decode(local)?;
        let text = text.replace(mode.terminator().as_str(), "\n");
        self.wire.encode(&text)
    }

    /// Converts wire file content to local form.
    pub fn to_local_text(&self, wire: &[u8], mode: LineEnding) -> Result<Vec<u8>, CharsetError> {
        if self.same_charset() {
            return Ok(mode.with_layout(self.wire.layout()).to_local(wire).into_owned());
        }
        let text = self.wire.decode(wire)?;
        let terminator = mode.terminator().as_str();
        let text = if terminator == "\n" {
            text
        } else {
            text.replace('\n', terminator)
        };
        self.local.encode(&text)
    }
}

impl Default for CharsetContext {
    fn default() -> Self {
        Self::utf8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Utf8ErrorKind;

    #[test]
    fn test_utf8_codec_is_strict() {
        let codec = codec_for("utf8", false).unwrap();
        assert_eq!(codec.decode("naïve".as_bytes()).unwrap(), "naïve");
        let err = codec.decode(&[0x61, 0xC1, 0x81]).unwrap_err();
        assert_eq!(
            err,
            CharsetError::MalformedUtf8 {
                valid_up_to: 1,
                kind: Utf8ErrorKind::Overlong
            }
        );
    }

    #[test]
    fn test_utf8_bom() {
        let codec = codec_for("utf8-bom", false).unwrap();
        let encoded = codec.encode("hi").unwrap();
        assert_eq!(encoded, b"\xEF\xBB\xBFhi");
        assert_eq!(codec.decode(&encoded).unwrap(), "hi");
    }

    #[test]
    fn test_unknown_charset() {
        let err = codec_for("ebcdic", false).unwrap_err();
        assert_eq!(err, CharsetError::UnknownCharset("ebcdic".to_string()));
    }

    #[test]
    fn test_every_listed_name_resolves() {
        for name in CHARSET_NAMES {
            assert!(codec_for(name, true).is_ok(), "{name} did not resolve");
        }
    }

    #[test]
    fn test_legacy_unmappable_is_an_error() {
        let codec = codec_for("winansi", false).unwrap();
        assert_eq!(codec.encode("café").unwrap(), b"caf\xE9");
        let err = codec.encode("日本").unwrap_err();
        assert!(matches!(err, CharsetError::Unmappable { ch: '日', .. }));
    }

    #[test]
    fn test_legacy_undecodable_is_an_error() {
        let codec = codec_for("shiftjis", false).unwrap();
        // 0x81 is a lead byte that needs a trail byte.
        assert!(codec.decode(&[0x81]).is_err());
    }

    #[test]
    fn test_shiftjis_remap_decorator() {
        let plain = codec_for("shiftjis", false).unwrap();
        let remapped = codec_for("shiftjis", true).unwrap();
        let bytes = [0x81, 0x60, 0x81, 0x61];

        assert_eq!(plain.decode(&bytes).unwrap(), "\u{301C}\u{2016}");
        assert_eq!(remapped.decode(&bytes).unwrap(), "\u{FF5E}\u{2225}");
        assert_eq!(remapped.encode("\u{FF5E}\u{2225}").unwrap(), bytes);
    }

    #[test]
    fn test_shiftjis_encodes_either_wave_dash_form() {
        let bytes = vec![0x81, 0x60, 0x81, 0x61];
        for remap in [false, true] {
            let codec = codec_for("shiftjis", remap).unwrap();
            assert_eq!(codec.encode("\u{301C}\u{2016}").unwrap(), bytes);
            assert_eq!(codec.encode("\u{FF5E}\u{2225}").unwrap(), bytes);
        }

        let remapped = codec_for("shiftjis", true).unwrap();
        let path = "//depot/\u{FF5E}\u{30C6}\u{30B9}\u{30C8}.txt";
        let encoded = remapped.encode(path).unwrap();
        assert_eq!(remapped.decode(&encoded).unwrap(), path);
    }

    #[test]
    fn test_utf16_codecs() {
        let le = codec_for("utf16le", false).unwrap();
        assert_eq!(le.encode("A\n").unwrap(), vec![0x41, 0x00, 0x0A, 0x00]);
        assert_eq!(le.decode(&[0x41, 0x00]).unwrap(), "A");

        let be_bom = codec_for("utf16be-bom", false).unwrap();
        let encoded = be_bom.encode("é").unwrap();
        assert_eq!(encoded, vec![0xFE, 0xFF, 0x00, 0xE9]);
        // A BOM overrides the configured byte order.
        assert_eq!(le.decode(&encoded).unwrap(), "é");

        assert!(matches!(
            le.decode(&[0x41]),
            Err(CharsetError::OddLength { len: 1, .. })
        ));
        // Unpaired high surrogate.
        assert!(le.decode(&[0x00, 0xD8]).is_err());
    }

    #[test]
    fn test_needs_transform_flag() {
        assert!(!CharsetContext::from_names("utf8", "utf8", false, LineEnding::LF)
            .unwrap()
            .needs_transform());
        assert!(CharsetContext::from_names("utf8", "utf8", false, LineEnding::CRLF)
            .unwrap()
            .needs_transform());
        // LF is a different byte sequence in UTF-16.
        assert!(CharsetContext::from_names("utf8", "utf16le", false, LineEnding::LF)
            .unwrap()
            .needs_transform());
    }

    #[test]
    fn test_to_local_text_transcodes() {
        let ctx = CharsetContext::from_names("utf8", "winansi", false, LineEnding::CRLF).unwrap();
        let local = ctx
            .to_local_text("café\nbar\n".as_bytes(), LineEnding::CRLF)
            .unwrap();
        assert_eq!(local, b"caf\xE9\r\nbar\r\n");
        let wire = ctx.to_wire_text(&local, LineEnding::CRLF).unwrap();
        assert_eq!(wire, "café\nbar\n".as_bytes());
    }

    #[test]
    fn test_same_charset_only_rewrites_line_endings() {
        let ctx = CharsetContext::utf8();
        let local = ctx.to_local_text(b"a\nb", LineEnding::CR).unwrap();
        assert_eq!(local, b"a\rb");
        assert_eq!(ctx.to_wire_text(&local, LineEnding::CR).unwrap(), b"a\nb");
    }

    #[test]
    fn test_bom_difference_is_transcoded() {
        let ctx = CharsetContext::from_names("utf16", "utf16le", false, LineEnding::LF).unwrap();
        let wire = codec_for("utf16", false).unwrap().encode("A\n").unwrap();
        assert_eq!(wire, vec![0xFF, 0xFE, 0x41, 0x00, 0x0A, 0x00]);

        let local = ctx.to_local_text(&wire, LineEnding::LF).unwrap();
        assert_eq!(local, vec![0x41, 0x00, 0x0A, 0x00]);
        assert_eq!(ctx.to_wire_text(&local, LineEnding::LF).unwrap(), wire);
    }
}
