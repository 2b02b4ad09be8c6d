//! Server file type strings.
//!
//! The server describes a file's type with a short hex string
//! `fileType [ lineType [ uncompress ] ]`. Only the first and third digits
//! matter here; the second is the line-ending descriptor handled by
//! [`crate::line_ending`].

use serde::Serialize;
use std::fmt;

/// Base file type as sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Text,
    Binary,
    XText,
    XBinary,
    Symlink,
    Resource,
    XSymlink,
    XResource,
    Unicode,
    RText,
    XUnicode,
    XRText,
    AppleText,
    AppleFile,
    XAppleText,
    XAppleFile,
    Gunzip,
    XGunzip,
}

impl FileType {
    /// Decodes a server type string. A missing string means text; anything
    /// unrecognised is treated as binary.
    pub fn decode(type_string: Option<&str>) -> Self {
        let Some(s) = type_string else {
            return FileType::Text;
        };

        let digit = |i: usize| s.chars().nth(i).and_then(|c| c.to_digit(16)).unwrap_or(0);
        let tf = digit(0);
        let tu = digit(2);

        match (tu << 8) | tf {
            0x000 => FileType::Text,
            0x001 => FileType::Binary,
            0x002 => FileType::XText,
            0x003 => FileType::XBinary,
            0x004 => FileType::Symlink,
            0x005 => FileType::Resource,
            0x006 => FileType::XSymlink,
            0x007 => FileType::XResource,
            0x008 => FileType::Unicode,
            0x009 => FileType::RText,
            0x00A => FileType::XUnicode,
            0x00B => FileType::XRText,
            0x00C => FileType::AppleText,
            0x00D => FileType::AppleFile,
            0x00E => FileType::XAppleText,
            0x00F => FileType::XAppleFile,
            0x101 => FileType::Gunzip,
            0x103 => FileType::XGunzip,
            _ => FileType::Binary,
        }
    }

    /// Raw text is never line-ending translated.
    pub fn is_raw_text(&self) -> bool {
        matches!(self, FileType::RText | FileType::XRText)
    }

    /// Whether content of this type goes through the text codec.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            FileType::Text
                | FileType::XText
                | FileType::RText
                | FileType::XRText
                | FileType::Unicode
                | FileType::XUnicode
                | FileType::AppleText
        )
    }

    /// Whether the server expects the unicode (charset-translated) path.
    pub fn is_unicode(&self) -> bool {
        matches!(self, FileType::Unicode | FileType::XUnicode)
    }

    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            FileType::XText
                | FileType::XRText
                | FileType::XAppleFile
                | FileType::XBinary
                | FileType::XUnicode
                | FileType::XGunzip
        )
    }

    /// Whether the content arrives gzip-compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self, FileType::Gunzip | FileType::XGunzip)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileType::Text => "text",
            FileType::Binary => "binary",
            FileType::XText => "xtext",
            FileType::XBinary => "xbinary",
            FileType::Symlink => "symlink",
            FileType::Resource => "resource",
            FileType::XSymlink => "xsymlink",
            FileType::XResource => "xresource",
            FileType::Unicode => "unicode",
            FileType::RText => "rtext",
            FileType::XUnicode => "xunicode",
            FileType::XRText => "xrtext",
            FileType::AppleText => "appletext",
            FileType::AppleFile => "apple",
            FileType::XAppleText => "xappletext",
            FileType::XAppleFile => "xapple",
            FileType::Gunzip => "gunzip",
            FileType::XGunzip => "xgunzip",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_string_is_text() {
        assert_eq!(FileType::decode(None), FileType::Text);
        assert_eq!(FileType::decode(Some("")), FileType::Text);
        // Non-hex digits read as zero.
        assert_eq!(FileType::decode(Some("zz")), FileType::Text);
    }

    #[test]
    fn test_decode_base_types() {
        assert_eq!(FileType::decode(Some("0")), FileType::Text);
        assert_eq!(FileType::decode(Some("1")), FileType::Binary);
        assert_eq!(FileType::decode(Some("2")), FileType::XText);
        assert_eq!(FileType::decode(Some("8")), FileType::Unicode);
        // The second digit is the line-ending descriptor and is ignored here.
        assert_eq!(FileType::decode(Some("93")), FileType::RText);
        assert_eq!(FileType::decode(Some("b1")), FileType::XRText);
        assert_eq!(FileType::decode(Some("f")), FileType::XAppleFile);
    }

    #[test]
    fn test_decode_uncompress_digit() {
        assert_eq!(FileType::decode(Some("101")), FileType::Gunzip);
        assert_eq!(FileType::decode(Some("301")), FileType::XGunzip);
        // Unknown combinations fall back to binary.
        assert_eq!(FileType::decode(Some("001")), FileType::Binary);
        assert_eq!(FileType::decode(Some("502")), FileType::Binary);
    }

    #[test]
    fn test_type_with_line_ending_descriptor() {
        use crate::line_ending::LineEnding;

        assert_eq!(FileType::decode(Some("03")), FileType::Text);
        assert_eq!(LineEnding::for_file(Some("03")), LineEnding::CRLF);
        assert_eq!(FileType::decode(Some("9")), FileType::RText);
        assert_eq!(LineEnding::for_file(Some("9")), LineEnding::LF);
    }

    #[test]
    fn test_predicates() {
        assert!(FileType::RText.is_raw_text());
        assert!(FileType::XRText.is_raw_text());
        assert!(!FileType::Text.is_raw_text());
        assert!(FileType::Unicode.is_text());
        assert!(!FileType::Binary.is_text());
        assert!(FileType::XBinary.is_executable());
        assert!(FileType::Gunzip.is_compressed());
        assert_eq!(FileType::XUnicode.to_string(), "xunicode");
    }
}
