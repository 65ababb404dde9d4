// SPDX-License-Identifier: Apache-2.0

use chrono::Utc;
use tracing::debug;

use super::{ByteSource, Message, Reader};
use crate::harvester::encoding::{DecodeError, Decoder};
use crate::harvester::error::Result;

/// Splits a byte source into newline-terminated lines.
///
/// Only complete lines are returned. `Message::bytes` always counts the raw
/// length of the line including its terminator and anything dropped beyond
/// `max_bytes`, so summing it reproduces the file offset.
pub struct LineReader<S> {
    source: S,
    decoder: Decoder,
    buf: Vec<u8>,
    /// `buf[..scanned]` is known not to contain a terminator
    scanned: usize,
    /// Bytes of the current line already discarded for exceeding `max_bytes`
    skipped: usize,
    buffer_size: usize,
    max_bytes: usize,
}

impl<S: ByteSource> LineReader<S> {
    pub fn new(source: S, decoder: Decoder, buffer_size: usize, max_bytes: usize) -> Self {
        let unit = decoder.unit_width();
        Self {
            source,
            decoder,
            buf: Vec::with_capacity(buffer_size),
            scanned: 0,
            skipped: 0,
            buffer_size: buffer_size.max(1),
            max_bytes: (max_bytes / unit * unit).max(unit),
        }
    }

    fn aligned(&self, len: usize) -> usize {
        let unit = self.decoder.unit_width();
        len / unit * unit
    }

    fn take_line(&mut self) -> Option<Message> {
        let Some(idx) = self.decoder.find_newline(&self.buf, self.scanned) else {
            self.scanned = self.aligned(self.buf.len());
            return None;
        };
        let end = idx + self.decoder.unit_width();
        let truncated = idx > self.max_bytes || self.skipped > 0;
        let content = &self.buf[..idx.min(self.max_bytes)];

        let mut text = self.decode(content, truncated);
        if text.ends_with('\r') {
            text.pop();
        }
        let bytes = self.skipped + end;

        self.buf.drain(..end);
        self.scanned = 0;
        self.skipped = 0;

        Some(Message {
            ts: Utc::now(),
            content: text,
            bytes,
            fields: None,
        })
    }

    fn decode(&self, raw: &[u8], truncated: bool) -> String {
        match self.decoder.decode(raw) {
            Ok(text) => text,
            // A cut at max_bytes may split a character; keep only the whole ones.
            Err(DecodeError::Incomplete { valid_up_to }) if truncated => self
                .decoder
                .decode(&raw[..valid_up_to])
                .unwrap_or_else(|_| self.decoder.decode_lossy(&raw[..valid_up_to])),
            Err(e) => {
                debug!(
                    encoding = self.decoder.name(),
                    error = ?e,
                    "Line contains invalid characters, replacing them"
                );
                self.decoder.decode_lossy(raw)
            }
        }
    }

    /// Drop the part of an unterminated line that can never be part of its content.
    fn discard_overflow(&mut self) {
        let aligned = self.aligned(self.buf.len());
        if aligned > self.max_bytes {
            self.buf.drain(self.max_bytes..aligned);
            self.skipped += aligned - self.max_bytes;
            self.scanned = self.max_bytes;
        }
    }

    fn fill(&mut self) -> Result<()> {
        let start = self.buf.len();
        self.buf.resize(start + self.buffer_size, 0);
        match self.source.read(&mut self.buf[start..]) {
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(())
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }
}

impl<S: ByteSource> Reader for LineReader<S> {
    fn next(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.take_line() {
                return Ok(message);
            }
            self.discard_overflow();
            self.fill()?;
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.source.rewind()?;
        self.buf.clear();
        self.scanned = 0;
        self.skipped = 0;
        Ok(())
    }

    fn set_deadline(&mut self, deadline: Option<std::time::Instant>) {
        self.source.set_deadline(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvester::error::Error;
    use crate::harvester::reader::test_util::ScriptedSource;

    fn reader(chunks: &[&[u8]], decoder: Decoder, max_bytes: usize) -> LineReader<ScriptedSource> {
        LineReader::new(ScriptedSource::new(chunks), decoder, 4, max_bytes)
    }

    fn collect(r: &mut impl Reader) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        loop {
            match r.next() {
                Ok(m) => out.push((m.content, m.bytes)),
                Err(Error::Stopped) => return out,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_splits_lines_across_reads() {
        let mut r = reader(&[b"a\nb", b"b\ncc", b"c\n"], Decoder::Utf8, 1024);
        assert_eq!(
            collect(&mut r),
            vec![
                ("a".to_string(), 2),
                ("bb".to_string(), 3),
                ("ccc".to_string(), 4)
            ]
        );
    }

    #[test]
    fn test_partial_line_is_not_emitted() {
        let mut r = reader(&[b"done\npart"], Decoder::Utf8, 1024);
        assert_eq!(collect(&mut r), vec![("done".to_string(), 5)]);
    }

    #[test]
    fn test_strips_carriage_return() {
        let mut r = reader(&[b"win\r\n\n"], Decoder::Utf8, 1024);
        assert_eq!(
            collect(&mut r),
            vec![("win".to_string(), 5), ("".to_string(), 1)]
        );
    }

    #[test]
    fn test_max_bytes_truncates_but_counts_everything() {
        let mut r = reader(&[b"0123456789", b"abcdef\nok\n"], Decoder::Utf8, 4);
        assert_eq!(
            collect(&mut r),
            vec![("0123".to_string(), 17), ("ok".to_string(), 3)]
        );
    }

    #[test]
    fn test_max_bytes_does_not_split_characters() {
        // "é" is two bytes; a cut after 2 bytes would split it
        let mut r = reader(&["aé\n".as_bytes()], Decoder::Utf8, 2);
        assert_eq!(collect(&mut r), vec![("a".to_string(), 4)]);
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut r = reader(&[b"a\xFFb\n"], Decoder::Utf8, 1024);
        assert_eq!(collect(&mut r), vec![("a\u{FFFD}b".to_string(), 4)]);
    }

    #[test]
    fn test_multibyte_split_across_reads() {
        let bytes = "héllo\n".as_bytes();
        let mut r = reader(&[&bytes[..2], &bytes[2..]], Decoder::Utf8, 1024);
        assert_eq!(collect(&mut r), vec![("héllo".to_string(), 7)]);
    }

    #[test]
    fn test_utf16_lines() {
        let raw: Vec<u8> = "hi\nyo\n".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut r = reader(&[&raw[..3], &raw[3..]], Decoder::Utf16 { big_endian: false }, 1024);
        assert_eq!(
            collect(&mut r),
            vec![("hi".to_string(), 6), ("yo".to_string(), 6)]
        );
    }

    #[test]
    fn test_rewind_drops_buffered_bytes() {
        let mut r = reader(&[b"old partial"], Decoder::Utf8, 1024);
        assert!(matches!(r.next(), Err(Error::Stopped)));
        r.rewind().unwrap();
        assert!(r.buf.is_empty());
        assert_eq!(r.source.rewinds, 1);
    }
}
