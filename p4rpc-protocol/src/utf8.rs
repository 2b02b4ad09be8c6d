//! Strict UTF-8 validation.
//!
//! Server payloads are checked byte by byte with an explicit state machine
//! so that malformed input is reported instead of being replaced. The
//! accepted language is exactly the well-formed UTF-8 of RFC 3629:
//!
//! ```text
//! lead      second    third     fourth
//! 00..7F
//! C2..DF    80..BF
//! E0        A0..BF    80..BF
//! E1..EC    80..BF    80..BF
//! ED        80..9F    80..BF
//! EE..EF    80..BF    80..BF
//! F0        90..BF    80..BF    80..BF
//! F1..F3    80..BF    80..BF    80..BF
//! F4        80..8F    80..BF    80..BF
//! ```

use crate::error::{CharsetError, Utf8ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Continuation {
        /// Continuation bytes still expected.
        remaining: u8,
        /// Inclusive bounds for the next byte.
        lo: u8,
        hi: u8,
        /// Reported when the next byte is a continuation byte outside `lo..=hi`.
        narrowed: Utf8ErrorKind,
        /// Stream offset of the lead byte.
        start: usize,
    },
}

/// Incremental validator; feed chunks with [`update`](Self::update) and
/// call [`finish`](Self::finish) at end of input.
#[derive(Debug, Clone)]
pub struct Utf8Validator {
    state: State,
    offset: usize,
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            offset: 0,
        }
    }

    /// Validates the next chunk of input.
    pub fn update(&mut self, chunk: &[u8]) -> Result<(), CharsetError> {
        for &byte in chunk {
            self.state = self.step(byte)?;
            self.offset += 1;
        }
        Ok(())
    }

    /// Signals end of input; fails if a multi-byte sequence is incomplete.
    pub fn finish(&self) -> Result<(), CharsetError> {
        match self.state {
            State::Ground => Ok(()),
            State::Continuation { start, .. } => Err(malformed(start, Utf8ErrorKind::Truncated)),
        }
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn step(&self, byte: u8) -> Result<State, CharsetError> {
        match self.state {
            State::Ground => self.lead(byte),
            State::Continuation {
                remaining,
                lo,
                hi,
                narrowed,
                start,
            } => {
                if !is_continuation(byte) {
                    return Err(malformed(start, Utf8ErrorKind::InvalidContinuation));
                }
                if byte < lo || byte > hi {
                    return Err(malformed(start, narrowed));
                }
                if remaining == 1 {
                    Ok(State::Ground)
                } else {
                    Ok(State::Continuation {
                        remaining: remaining - 1,
                        lo: 0x80,
                        hi: 0xBF,
                        narrowed: Utf8ErrorKind::InvalidContinuation,
                        start,
                    })
                }
            }
        }
    }

    fn lead(&self, byte: u8) -> Result<State, CharsetError> {
        let start = self.offset;
        let expect = |remaining, lo, hi, narrowed| {
            Ok(State::Continuation {
                remaining,
                lo,
                hi,
                narrowed,
                start,
            })
        };
        match byte {
            0x00..=0x7F => Ok(State::Ground),
            0x80..=0xBF => Err(malformed(start, Utf8ErrorKind::InvalidLeadByte)),
            // C0 and C1 can only start an overlong form of an ASCII byte.
            0xC0 | 0xC1 => Err(malformed(start, Utf8ErrorKind::Overlong)),
            0xC2..=0xDF => expect(1, 0x80, 0xBF, Utf8ErrorKind::InvalidContinuation),
            0xE0 => expect(2, 0xA0, 0xBF, Utf8ErrorKind::Overlong),
            0xED => expect(2, 0x80, 0x9F, Utf8ErrorKind::Surrogate),
            0xE1..=0xEC | 0xEE..=0xEF => expect(2, 0x80, 0xBF, Utf8ErrorKind::InvalidContinuation),
            0xF0 => expect(3, 0x90, 0xBF, Utf8ErrorKind::Overlong),
            0xF1..=0xF3 => expect(3, 0x80, 0xBF, Utf8ErrorKind::InvalidContinuation),
            0xF4 => expect(3, 0x80, 0x8F, Utf8ErrorKind::OutOfRange),
            0xF5..=0xF7 => Err(malformed(start, Utf8ErrorKind::OutOfRange)),
            0xF8..=0xFF => Err(malformed(start, Utf8ErrorKind::InvalidLeadByte)),
        }
    }
}

impl Default for Utf8Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

fn malformed(valid_up_to: usize, kind: Utf8ErrorKind) -> CharsetError {
    CharsetError::MalformedUtf8 { valid_up_to, kind }
}

/// Validates a complete buffer.
pub fn validate(bytes: &[u8]) -> Result<(), CharsetError> {
    let mut validator = Utf8Validator::new();
    validator.update(bytes)?;
    validator.finish()
}

/// Validates a complete buffer and borrows it as `&str`.
pub fn decode(bytes: &[u8]) -> Result<&str, CharsetError> {
    validate(bytes)?;
    std::str::from_utf8(bytes).map_err(|_| CharsetError::Undecodable { charset: "UTF-8" })
}
