//! Opaque continuation token encoding.
//!
//! Token body, before compression:
//!
//! ```text
//! u8      version (1)
//! u8      direction (0 = out, 1 = in)
//! varint  group count
//! per group:
//!   varint  key arity (always 3)
//!   3 x     varint length + UTF-8 bytes (node, property, neighbor type)
//!   varint  slot count
//!   per slot: u8 tag (0 = none, 1 = cursor) [varint partition, page, item]
//! u32 LE  crc32 of everything above
//! ```
//!
//! The body is snappy-compressed and base64url-encoded without padding. The
//! encoding has no maps or timestamps, so equal infos always yield equal tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::cursor::{CursorGroup, PageCursor, PaginationInfo};
use crate::error::{MixerError, Result};
use crate::types::{Direction, GraphKey};

const TOKEN_VERSION: u8 = 1;
const KEY_ARITY: u64 = 3;
const CHECKSUM_LEN: usize = 4;
const MAX_TOKEN_CHARS: usize = 1 << 20;
const MAX_BODY_BYTES: usize = 4 << 20;

const SLOT_NONE: u8 = 0;
const SLOT_CURSOR: u8 = 1;

/// Serializes `info` into a continuation token.
pub fn encode(info: &PaginationInfo) -> Result<String> {
    let mut body = Vec::with_capacity(16 + info.cursor_groups.len() * 32);
    body.push(TOKEN_VERSION);
    body.push(info.direction.tag());
    put_varint(info.cursor_groups.len() as u64, &mut body);
    for group in &info.cursor_groups {
        put_varint(KEY_ARITY, &mut body);
        put_str(&group.key.node, &mut body);
        put_str(&group.key.property, &mut body);
        put_str(&group.key.neighbor_type, &mut body);
        put_varint(group.cursors.len() as u64, &mut body);
        for slot in &group.cursors {
            match slot {
                None => body.push(SLOT_NONE),
                Some(cursor) => {
                    body.push(SLOT_CURSOR);
                    put_varint(u64::from(cursor.partition), &mut body);
                    put_varint(u64::from(cursor.page), &mut body);
                    put_varint(u64::from(cursor.item), &mut body);
                }
            }
        }
    }
    let crc = crc32fast::hash(&body);
    body.extend_from_slice(&crc.to_le_bytes());
    let compressed = snap::raw::Encoder::new()
        .compress_vec(&body)
        .map_err(|err| MixerError::internal(format!("token compression failed: {err}")))?;
    Ok(URL_SAFE_NO_PAD.encode(compressed))
}

/// Parses a continuation token produced by [`encode`].
///
/// Every failure, including the empty string, is reported as
/// [`MixerError::InvalidToken`].
pub fn decode(token: &str) -> Result<PaginationInfo> {
    if token.is_empty() {
        return Err(invalid("token is empty"));
    }
    if token.len() > MAX_TOKEN_CHARS {
        return Err(invalid(format!("token exceeds {MAX_TOKEN_CHARS} characters")));
    }
    let compressed = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|err| invalid(format!("not base64url: {err}")))?;
    let body_len = snap::raw::decompress_len(&compressed)
        .map_err(|err| invalid(format!("bad compression header: {err}")))?;
    if body_len > MAX_BODY_BYTES {
        return Err(invalid(format!("token body of {body_len} bytes is too large")));
    }
    let raw = snap::raw::Decoder::new()
        .decompress_vec(&compressed)
        .map_err(|err| invalid(format!("corrupt compression: {err}")))?;
    if raw.len() < CHECKSUM_LEN + 2 {
        return Err(invalid("token truncated"));
    }
    let (body, trailer) = raw.split_at(raw.len() - CHECKSUM_LEN);
    let mut crc_bytes = [0u8; CHECKSUM_LEN];
    crc_bytes.copy_from_slice(trailer);
    if crc32fast::hash(body) != u32::from_le_bytes(crc_bytes) {
        return Err(invalid("checksum mismatch"));
    }

    let mut reader = TokenReader::new(body);
    let version = reader.byte()?;
    if version != TOKEN_VERSION {
        return Err(invalid(format!("unsupported token version {version}")));
    }
    let tag = reader.byte()?;
    let direction =
        Direction::from_tag(tag).ok_or_else(|| invalid(format!("unknown direction tag {tag}")))?;
    let group_count = reader.length()?;
    let mut cursor_groups = Vec::with_capacity(group_count);
    for _ in 0..group_count {
        cursor_groups.push(read_group(&mut reader)?);
    }
    if reader.remaining() != 0 {
        return Err(invalid(format!(
            "{} trailing bytes after cursor groups",
            reader.remaining()
        )));
    }
    Ok(PaginationInfo {
        direction,
        cursor_groups,
    })
}

fn read_group(reader: &mut TokenReader<'_>) -> Result<CursorGroup> {
    let arity = reader.varint()?;
    if arity != KEY_ARITY {
        return Err(invalid(format!(
            "cursor group should have {KEY_ARITY} keys, got {arity}"
        )));
    }
    let node = reader.string()?;
    let property = reader.string()?;
    let neighbor_type = reader.string()?;
    let slots = reader.length()?;
    let mut cursors = Vec::with_capacity(slots);
    for slot in 0..slots {
        match reader.byte()? {
            SLOT_NONE => cursors.push(None),
            SLOT_CURSOR => {
                let cursor = PageCursor {
                    partition: reader.varint_u32()?,
                    page: reader.varint_u32()?,
                    item: reader.varint_u32()?,
                };
                if cursor.partition_index() != slot {
                    return Err(invalid(format!(
                        "cursor for partition {} stored in slot {slot}",
                        cursor.partition
                    )));
                }
                cursors.push(Some(cursor));
            }
            other => return Err(invalid(format!("unknown cursor slot tag {other}"))),
        }
    }
    Ok(CursorGroup {
        key: GraphKey {
            node,
            property,
            neighbor_type,
        },
        cursors,
    })
}

fn invalid(message: impl Into<String>) -> MixerError {
    MixerError::InvalidToken(message.into())
}

fn put_varint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn put_str(s: &str, out: &mut Vec<u8>) {
    put_varint(s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

/// Bounds-checked reader over a token body.
struct TokenReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> TokenReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.off)
    }

    fn byte(&mut self) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.off)
            .ok_or_else(|| invalid("token truncated"))?;
        self.off += 1;
        Ok(byte)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(invalid(format!(
                "need {n} bytes, {} remaining",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        for i in 0..10 {
            let byte = self.byte()?;
            let payload = u64::from(byte & 0x7f);
            if i == 9 && payload > 1 {
                return Err(invalid("varint overflows 64 bits"));
            }
            result |= payload << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(invalid("varint longer than 10 bytes"))
    }

    fn varint_u32(&mut self) -> Result<u32> {
        let v = self.varint()?;
        u32::try_from(v).map_err(|_| invalid(format!("cursor field {v} out of range")))
    }

    /// Reads a count and checks it cannot exceed the bytes left, so corrupt
    /// counts never drive large allocations.
    fn length(&mut self) -> Result<usize> {
        let v = self.varint()?;
        let len = usize::try_from(v).map_err(|_| invalid(format!("length {v} out of range")))?;
        if len > self.remaining() {
            return Err(invalid(format!(
                "length {len} exceeds {} remaining bytes",
                self.remaining()
            )));
        }
        Ok(len)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.length()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| invalid("key is not valid UTF-8"))
    }
}
