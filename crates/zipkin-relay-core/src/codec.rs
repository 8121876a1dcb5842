// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Compact binary encoding of one span, used to ship spans across the shard
//! bus between proxy instances.
//!
//! All integers are zig-zag encoded unsigned varints (7 payload bits per
//! byte, continuation bit in the MSB). Strings are `varint(len) || bytes`.
//! The tag map is a sequence of blocks, each `varint(count)` followed by
//! `count` key/value string pairs, terminated by a zero count; a negative
//! count is followed by a varint byte length and carries `-count` entries.
//!
//! The codec checks structural well-formedness only; semantic invariants are
//! the aggregator's business.

use std::collections::HashMap;
use std::sync::Arc;

use crate::id::Id;
use crate::intern::InternCache;
use crate::span::Span;
use crate::timestamp::Timestamp;

/// A varint never needs more than 10 bytes for 64 bits of payload.
const MAX_VARINT_BYTES: usize = 10;

/// Structural decode failure. Encoding cannot fail.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MalformedEncoding {
    #[error("unexpected end of input")]
    Truncated,
    #[error("varint does not terminate within {MAX_VARINT_BYTES} bytes")]
    UnterminatedVarint,
    #[error("string length out of range: {0}")]
    StringLength(i64),
    #[error("string is not valid utf-8")]
    InvalidString,
}

/// Appends the binary encoding of `span` to `buf`.
pub fn encode_span(span: &Span, buf: &mut Vec<u8>) {
    write_long(buf, span.id.value() as i64);
    write_long(buf, span.trace.value() as i64);
    write_long(buf, span.parent.value() as i64);
    write_string(buf, &span.name);
    write_string(buf, &span.service);
    write_long(buf, span.timestamp.as_nanos());
    write_long(buf, span.duration);
    write_long(buf, span.timings.cs.as_nanos());
    write_long(buf, span.timings.cr.as_nanos());
    write_long(buf, span.timings.ss.as_nanos());
    write_long(buf, span.timings.sr.as_nanos());
    write_tags(buf, &span.tags);
}

/// Decodes one span from the front of `input`. Strings run through the
/// intern cache, so a decoded span compares equal to what was encoded while
/// sharing storage with every other span on this instance.
pub fn decode_span(input: &[u8], cache: &InternCache) -> Result<Span, MalformedEncoding> {
    let mut reader = Reader { buf: input, pos: 0 };

    let mut span = Span {
        id: Id::new(reader.read_long()? as u64),
        trace: Id::new(reader.read_long()? as u64),
        parent: Id::new(reader.read_long()? as u64),
        ..Span::default()
    };
    span.name = reader.read_string(cache)?;
    span.service = reader.read_string(cache)?;
    span.timestamp = Timestamp(reader.read_long()?);
    span.duration = reader.read_long()?;
    span.timings.cs = Timestamp(reader.read_long()?);
    span.timings.cr = Timestamp(reader.read_long()?);
    span.timings.ss = Timestamp(reader.read_long()?);
    span.timings.sr = Timestamp(reader.read_long()?);
    span.tags = reader.read_tags(cache)?;

    Ok(span)
}

fn write_long(buf: &mut Vec<u8>, value: i64) {
    let mut encoded = ((value << 1) ^ (value >> 63)) as u64;
    loop {
        let byte = (encoded & 0x7f) as u8;
        encoded >>= 7;
        if encoded == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_long(buf, value.len() as i64);
    buf.extend_from_slice(value.as_bytes());
}

fn write_tags(buf: &mut Vec<u8>, tags: &HashMap<Arc<str>, Arc<str>>) {
    write_long(buf, tags.len() as i64);
    if tags.is_empty() {
        return;
    }
    for (key, value) in tags {
        write_string(buf, key);
        write_string(buf, value);
    }
    write_long(buf, 0);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn read_byte(&mut self) -> Result<u8, MalformedEncoding> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(MalformedEncoding::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_long(&mut self) -> Result<i64, MalformedEncoding> {
        let mut value: u64 = 0;
        for idx in 0..MAX_VARINT_BYTES {
            let byte = self.read_byte()?;
            value |= u64::from(byte & 0x7f) << (7 * idx);
            if byte & 0x80 == 0 {
                return Ok((value >> 1) as i64 ^ -((value & 1) as i64));
            }
        }
        Err(MalformedEncoding::UnterminatedVarint)
    }

    fn read_string(&mut self, cache: &InternCache) -> Result<Arc<str>, MalformedEncoding> {
        let len = self.read_long()?;
        if !(0..=i64::from(i32::MAX)).contains(&len) {
            return Err(MalformedEncoding::StringLength(len));
        }
        let len = len as usize;
        if len == 0 {
            return Ok(cache.intern(""));
        }

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(MalformedEncoding::Truncated)?;
        let raw = &self.buf[self.pos..end];
        self.pos = end;

        let value = std::str::from_utf8(raw).map_err(|_| MalformedEncoding::InvalidString)?;
        Ok(cache.intern(value))
    }

    fn read_tags(
        &mut self,
        cache: &InternCache,
    ) -> Result<HashMap<Arc<str>, Arc<str>>, MalformedEncoding> {
        let mut tags = HashMap::new();
        loop {
            let mut count = self.read_long()?;
            if count == 0 {
                return Ok(tags);
            }
            if count < 0 {
                // negative counts are followed by the block's byte length
                count = -count;
                self.read_long()?;
            }
            for _ in 0..count {
                let key = self.read_string(cache)?;
                let value = self.read_string(cache)?;
                tags.insert(key, value);
            }
        }
    }
}
