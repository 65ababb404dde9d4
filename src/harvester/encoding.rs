// SPDX-License-Identifier: Apache-2.0

//! Encoding detection and decoding.
//!
//! Detection runs once, on a freshly opened handle positioned at byte 0. It may
//! consume a byte order mark; the handle is left just past whatever it consumed.
//! Decoding is done per line, after the line terminator has been located on a
//! code-unit boundary of the raw stream, so offsets always count raw bytes.

use serde::Deserialize;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::str::FromStr;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16_BE_BOM: [u8; 2] = [0xFE, 0xFF];

/// Configured file encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum EncodingKind {
    /// Bytes are passed through as UTF-8, no BOM handling
    #[default]
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "utf-8")]
    Utf8,
    /// ISO-8859-1
    #[serde(rename = "latin1")]
    Latin1,
    #[serde(rename = "utf-16le")]
    Utf16Le,
    #[serde(rename = "utf-16be")]
    Utf16Be,
    /// UTF-16 whose endianness is given by a mandatory byte order mark
    #[serde(rename = "utf-16-bom")]
    Utf16Bom,
}

impl EncodingKind {
    pub fn name(&self) -> &'static str {
        match self {
            EncodingKind::Plain => "plain",
            EncodingKind::Utf8 => "utf-8",
            EncodingKind::Latin1 => "latin1",
            EncodingKind::Utf16Le => "utf-16le",
            EncodingKind::Utf16Be => "utf-16be",
            EncodingKind::Utf16Bom => "utf-16-bom",
        }
    }
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncodingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(EncodingKind::Plain),
            "utf-8" | "utf8" => Ok(EncodingKind::Utf8),
            "latin1" | "iso8859-1" | "iso-8859-1" => Ok(EncodingKind::Latin1),
            "utf-16le" => Ok(EncodingKind::Utf16Le),
            "utf-16be" => Ok(EncodingKind::Utf16Be),
            "utf-16-bom" => Ok(EncodingKind::Utf16Bom),
            other => Err(format!("unknown encoding: {}", other)),
        }
    }
}

/// Why a decoder could not be established at open time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    /// Not enough bytes in the file yet to decide
    ShortSource { needed: usize, available: usize },
    /// The initial bytes contradict the configured encoding
    Malformed(String),
    Io(String),
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::ShortSource { needed, available } => write!(
                f,
                "file too short, need {} bytes but only {} available",
                needed, available
            ),
            DetectError::Malformed(reason) => write!(f, "malformed input: {}", reason),
            DetectError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl From<io::Error> for DetectError {
    fn from(err: io::Error) -> Self {
        DetectError::Io(err.to_string())
    }
}

/// Failure to decode a delimited run of bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ends in the middle of a character; the first `valid_up_to` bytes decode cleanly
    Incomplete { valid_up_to: usize },
    /// Invalid sequence starting at `valid_up_to`
    Malformed { valid_up_to: usize },
}

/// Active decoder for one harvested file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Utf8,
    Latin1,
    Utf16 { big_endian: bool },
}

impl Decoder {
    pub fn name(&self) -> &'static str {
        match self {
            Decoder::Utf8 => "utf-8",
            Decoder::Latin1 => "latin1",
            Decoder::Utf16 { big_endian: false } => "utf-16le",
            Decoder::Utf16 { big_endian: true } => "utf-16be",
        }
    }

    /// Width in bytes of one code unit; terminators are only matched on unit boundaries.
    pub fn unit_width(&self) -> usize {
        match self {
            Decoder::Utf8 | Decoder::Latin1 => 1,
            Decoder::Utf16 { .. } => 2,
        }
    }

    /// Position of the first encoded `\n` at or after `from` (which must be unit aligned).
    pub fn find_newline(&self, buf: &[u8], from: usize) -> Option<usize> {
        match self {
            Decoder::Utf8 | Decoder::Latin1 => buf
                .get(from..)?
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| from + i),
            Decoder::Utf16 { big_endian } => {
                let unit: [u8; 2] = if *big_endian { [0, b'\n'] } else { [b'\n', 0] };
                let mut i = from;
                while i + 2 <= buf.len() {
                    if buf[i..i + 2] == unit {
                        return Some(i);
                    }
                    i += 2;
                }
                None
            }
        }
    }

    /// Strict decode that tells a truncated character apart from an invalid one.
    pub fn decode(&self, raw: &[u8]) -> Result<String, DecodeError> {
        match self {
            Decoder::Utf8 => match std::str::from_utf8(raw) {
                Ok(s) => Ok(s.to_string()),
                Err(e) => match e.error_len() {
                    None => Err(DecodeError::Incomplete {
                        valid_up_to: e.valid_up_to(),
                    }),
                    Some(_) => Err(DecodeError::Malformed {
                        valid_up_to: e.valid_up_to(),
                    }),
                },
            },
            Decoder::Latin1 => Ok(raw.iter().map(|b| *b as char).collect()),
            Decoder::Utf16 { big_endian } => decode_utf16(raw, *big_endian),
        }
    }

    /// Decode replacing malformed sequences with U+FFFD.
    pub fn decode_lossy(&self, raw: &[u8]) -> String {
        match self {
            Decoder::Utf8 => String::from_utf8_lossy(raw).into_owned(),
            Decoder::Latin1 => raw.iter().map(|b| *b as char).collect(),
            Decoder::Utf16 { big_endian } => {
                let units = utf16_units(raw, *big_endian);
                let mut text: String = char::decode_utf16(units)
                    .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect();
                if raw.len() % 2 != 0 {
                    text.push(char::REPLACEMENT_CHARACTER);
                }
                text
            }
        }
    }
}

fn utf16_units(raw: &[u8], big_endian: bool) -> impl Iterator<Item = u16> + '_ {
    raw.chunks_exact(2).map(move |pair| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    })
}

fn decode_utf16(raw: &[u8], big_endian: bool) -> Result<String, DecodeError> {
    let mut text = String::with_capacity(raw.len() / 2);
    let mut consumed = 0usize;
    for result in char::decode_utf16(utf16_units(raw, big_endian)) {
        match result {
            Ok(c) => {
                text.push(c);
                consumed += c.len_utf16() * 2;
            }
            Err(e) => {
                let unit = e.unpaired_surrogate();
                // A high surrogate in the final unit may still be completed by the next read.
                let is_last_unit = consumed + 2 >= raw.len() - raw.len() % 2;
                if (0xD800..0xDC00).contains(&unit) && is_last_unit {
                    return Err(DecodeError::Incomplete {
                        valid_up_to: consumed,
                    });
                }
                return Err(DecodeError::Malformed {
                    valid_up_to: consumed,
                });
            }
        }
    }
    if raw.len() % 2 != 0 {
        return Err(DecodeError::Incomplete {
            valid_up_to: consumed,
        });
    }
    Ok(text)
}

/// Result of encoding detection on a freshly opened handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detected {
    pub decoder: Decoder,
    /// Bytes consumed by detection (a byte order mark); the handle is positioned here.
    pub consumed: u64,
}

/// Inspect the first bytes of `src` (positioned at 0) and pick a decoder.
pub fn detect<R: Read + Seek>(kind: EncodingKind, src: &mut R) -> Result<Detected, DetectError> {
    let detected = match kind {
        EncodingKind::Plain => Detected {
            decoder: Decoder::Utf8,
            consumed: 0,
        },
        EncodingKind::Latin1 => Detected {
            decoder: Decoder::Latin1,
            consumed: 0,
        },
        EncodingKind::Utf16Le => Detected {
            decoder: Decoder::Utf16 { big_endian: false },
            consumed: 0,
        },
        EncodingKind::Utf16Be => Detected {
            decoder: Decoder::Utf16 { big_endian: true },
            consumed: 0,
        },
        EncodingKind::Utf8 => {
            let mut head = [0u8; 3];
            let n = read_up_to(src, &mut head)?;
            let consumed = if n == 3 && head == UTF8_BOM { 3 } else { 0 };
            Detected {
                decoder: Decoder::Utf8,
                consumed,
            }
        }
        EncodingKind::Utf16Bom => {
            let mut head = [0u8; 2];
            let n = read_up_to(src, &mut head)?;
            if n < 2 {
                return Err(DetectError::ShortSource {
                    needed: 2,
                    available: n,
                });
            }
            let big_endian = match head {
                UTF16_LE_BOM => false,
                UTF16_BE_BOM => true,
                other => {
                    return Err(DetectError::Malformed(format!(
                        "missing byte order mark, found {:02x?}",
                        other
                    )));
                }
            };
            Detected {
                decoder: Decoder::Utf16 { big_endian },
                consumed: 2,
            }
        }
    };

    src.seek(SeekFrom::Start(detected.consumed))?;
    Ok(detected)
}

/// Read until `buf` is full or EOF, returning the number of bytes read.
fn read_up_to<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
