//! buffers for use when writing and reading dns packets

use std::collections::BTreeMap;
use std::fmt::Write;

use derive_more::Display;

/// Longest label allowed by RFC 1035.
pub const MAX_LABEL_LEN: usize = 63;

/// Longest name, in wire octets, including the root label.
pub const MAX_NAME_LEN: usize = 255;

/// Upper bound on the number of compression pointers followed while
/// reading a single name.
pub const MAX_POINTER_JUMPS: usize = 128;

/// Largest message that can be represented with a 16-bit TCP length prefix.
pub const MAX_MESSAGE_LEN: usize = 65535;

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum BufferError {
    InsufficientData,
    #[display(fmt = "label of {} octets exceeds 63", _0)]
    LabelTooLong(usize),
    NameTooLong,
    EmptyLabel,
    BadEscape,
    #[display(fmt = "compression pointer at {} targets {}", position, target)]
    ForwardPointer { position: usize, target: usize },
    TooManyJumps,
    #[display(fmt = "unsupported label type {:#04x}", _0)]
    BadLabelType(u8),
    MessageTooLarge,
    ReadOnly,
}

impl std::error::Error for BufferError {}

pub type Result<T> = std::result::Result<T, BufferError>;

/// A saved read position.
///
/// Obtained from [`PacketBuffer::mark`] and consumed by either
/// [`PacketBuffer::rollback`] or [`PacketBuffer::commit`], so a mark can
/// never outlive the parse it was taken for.
#[must_use = "a mark must be rolled back or committed"]
#[derive(Debug, PartialEq, Eq)]
pub struct Mark(usize);

pub trait PacketBuffer {
    fn len(&self) -> usize;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn get(&self, pos: usize) -> Result<u8>;
    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;

    /// Position of a previously written name suffix, if the buffer keeps
    /// track of them.
    fn find_label(&self, _suffix: &[u8]) -> Option<usize> {
        None
    }

    fn save_label(&mut self, _suffix: Vec<u8>, _pos: usize) {}

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remaining(&self) -> usize {
        self.len().saturating_sub(self.pos())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        let pos = self
            .pos()
            .checked_add(steps)
            .ok_or(BufferError::InsufficientData)?;
        self.seek(pos)
    }

    fn mark(&self) -> Mark {
        Mark(self.pos())
    }

    fn rollback(&mut self, mark: Mark) -> Result<()> {
        self.seek(mark.0)
    }

    fn commit(&mut self, mark: Mark) {
        let Mark(_) = mark;
    }

    fn read(&mut self) -> Result<u8> {
        let res = self.get(self.pos())?;
        self.step(1)?;

        Ok(res)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let range = self.get_range(self.pos(), 2)?;
        let res = u16::from_be_bytes([range[0], range[1]]);
        self.step(2)?;

        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let range = self.get_range(self.pos(), 4)?;
        let res = u32::from_be_bytes([range[0], range[1], range[2], range[3]]);
        self.step(4)?;

        Ok(res)
    }

    /// Fetches `len` bytes, failing without moving if fewer remain.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let res = self.get_range(self.pos(), len)?.to_vec();
        self.step(len)?;

        Ok(res)
    }

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        for b in val.to_be_bytes().iter() {
            self.write(*b)?;
        }

        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        for b in val.to_be_bytes().iter() {
            self.write(*b)?;
        }

        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        for b in data {
            self.write(*b)?;
        }

        Ok(())
    }

    fn set_u16(&mut self, pos: usize, val: u16) -> Result<()> {
        let bytes = val.to_be_bytes();
        self.set(pos, bytes[0])?;
        self.set(pos + 1, bytes[1])?;

        Ok(())
    }

    /// Writes a textual name in wire format, reusing earlier suffixes when
    /// the buffer remembers them.
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        let labels = parse_labels(qname)?;

        for idx in 0..labels.len() {
            let suffix = suffix_key(&labels[idx..]);
            if let Some(prev) = self.find_label(&suffix) {
                self.write_u16(0xC000 | prev as u16)?;
                return Ok(());
            }

            let pos = self.pos();
            if pos <= 0x3FFF {
                self.save_label(suffix, pos);
            }

            self.write_u8(labels[idx].len() as u8)?;
            self.write_bytes(&labels[idx])?;
        }

        self.write_u8(0)
    }

    /// Reads a possibly compressed name into `outstr`.
    ///
    /// Every pointer must point strictly before the pointer itself, so each
    /// jump moves backwards and the walk always terminates. The jump count
    /// and the reconstructed length are bounded as well.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps = 0;

        // The root label always takes one octet.
        let mut wire_len = 1;

        let mut delim = "";
        loop {
            let len = self.get(pos)?;

            match len & 0xC0 {
                0xC0 => {
                    if jumps >= MAX_POINTER_JUMPS {
                        return Err(BufferError::TooManyJumps);
                    }

                    let b2 = self.get(pos + 1)? as usize;
                    let offset = (((len as usize) ^ 0xC0) << 8) | b2;
                    if offset >= pos {
                        return Err(BufferError::ForwardPointer {
                            position: pos,
                            target: offset,
                        });
                    }

                    // Only the first jump decides where the caller resumes.
                    if !jumped {
                        self.seek(pos + 2)?;
                    }

                    pos = offset;
                    jumped = true;
                    jumps += 1;
                    continue;
                }
                0x00 => {}
                _ => return Err(BufferError::BadLabelType(len)),
            }

            pos += 1;

            // Names are terminated by an empty label of length 0
            if len == 0 {
                break;
            }

            wire_len += len as usize + 1;
            if wire_len > MAX_NAME_LEN {
                return Err(BufferError::NameTooLong);
            }

            outstr.push_str(delim);
            escape_label(self.get_range(pos, len as usize)?, outstr);
            delim = ".";

            pos += len as usize;
        }

        if !jumped {
            self.seek(pos)?;
        }

        Ok(())
    }

    /// Reads the length-prefixed strings packed into the next `limit`
    /// bytes. At least one string must be present and the last one must end
    /// exactly at the limit. On failure the position is left untouched.
    fn read_binstrings(&mut self, limit: usize) -> Result<Vec<Vec<u8>>> {
        if limit == 0 || limit > self.remaining() {
            return Err(BufferError::InsufficientData);
        }

        let mark = self.mark();
        let end = self.pos() + limit;

        let mut strings = Vec::new();
        while self.pos() < end {
            let len = match self.read() {
                Ok(len) => len as usize,
                Err(err) => {
                    self.rollback(mark)?;
                    return Err(err);
                }
            };

            if self.pos() + len > end {
                self.rollback(mark)?;
                return Err(BufferError::InsufficientData);
            }

            strings.push(self.read_bytes(len)?);
        }

        self.commit(mark);

        Ok(strings)
    }

    /// Like [`PacketBuffer::read_binstrings`], but returns the strings
    /// concatenated into one byte sequence.
    fn read_binstring(&mut self, limit: usize) -> Result<Vec<u8>> {
        Ok(self.read_binstrings(limit)?.concat())
    }
}

/// Splits a textual name into raw labels, resolving `\.`, `\\` and
/// `\DDD` escapes.
pub fn parse_labels(qname: &str) -> Result<Vec<Vec<u8>>> {
    let bytes = qname.as_bytes();
    let mut labels = Vec::new();

    if bytes.is_empty() || bytes == b"." {
        return Ok(labels);
    }

    let mut label = Vec::new();
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'.' => {
                if label.is_empty() {
                    return Err(BufferError::EmptyLabel);
                }
                labels.push(std::mem::take(&mut label));
                idx += 1;
            }
            b'\\' => {
                let rest = &bytes[idx + 1..];
                if rest.len() >= 3 && rest[..3].iter().all(u8::is_ascii_digit) {
                    let val = rest[..3]
                        .iter()
                        .fold(0u32, |acc, d| acc * 10 + (d - b'0') as u32);
                    if val > 255 {
                        return Err(BufferError::BadEscape);
                    }
                    label.push(val as u8);
                    idx += 4;
                } else if let Some(c) = rest.first() {
                    label.push(*c);
                    idx += 2;
                } else {
                    return Err(BufferError::BadEscape);
                }
            }
            c => {
                label.push(c);
                idx += 1;
            }
        }

        if label.len() > MAX_LABEL_LEN {
            return Err(BufferError::LabelTooLong(label.len()));
        }
    }

    if !label.is_empty() {
        labels.push(label);
    }

    let wire_len = labels.iter().map(|x| x.len() + 1).fold(1, |x, y| x + y);
    if wire_len > MAX_NAME_LEN {
        return Err(BufferError::NameTooLong);
    }

    Ok(labels)
}

fn suffix_key(labels: &[Vec<u8>]) -> Vec<u8> {
    let mut key = Vec::new();
    for label in labels {
        key.push(label.len() as u8);
        key.extend_from_slice(label);
    }

    key
}

fn escape_label(label: &[u8], outstr: &mut String) {
    for &b in label {
        match b {
            b'.' | b'\\' => {
                outstr.push('\\');
                outstr.push(b as char);
            }
            0x21..=0x7E => outstr.push(b as char),
            _ => {
                let _ = write!(outstr, "\\{:03}", b);
            }
        }
    }
}

/// Growable, writable buffer used for encoding.
#[derive(Default)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
    pub label_lookup: BTreeMap<Vec<u8>, usize>,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::new(),
            pos: 0,
            label_lookup: BTreeMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::with_capacity(capacity),
            pos: 0,
            label_lookup: BTreeMap::new(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buffer.len() {
            return Err(BufferError::InsufficientData);
        }
        self.pos = pos;

        Ok(())
    }

    fn get(&self, pos: usize) -> Result<u8> {
        self.buffer
            .get(pos)
            .copied()
            .ok_or(BufferError::InsufficientData)
    }

    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]> {
        let end = start.checked_add(len).ok_or(BufferError::InsufficientData)?;
        self.buffer
            .get(start..end)
            .ok_or(BufferError::InsufficientData)
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos < self.buffer.len() {
            self.buffer[self.pos] = val;
        } else {
            if self.buffer.len() >= MAX_MESSAGE_LEN {
                return Err(BufferError::MessageTooLarge);
            }
            self.buffer.push(val);
        }
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        match self.buffer.get_mut(pos) {
            Some(slot) => {
                *slot = val;
                Ok(())
            }
            None => Err(BufferError::InsufficientData),
        }
    }

    fn find_label(&self, suffix: &[u8]) -> Option<usize> {
        self.label_lookup.get(suffix).copied()
    }

    fn save_label(&mut self, suffix: Vec<u8>, pos: usize) {
        self.label_lookup.insert(suffix, pos);
    }
}

/// Read-only view over received bytes, used for decoding.
pub struct BytePacketBuffer<'a> {
    pub buf: &'a [u8],
    pub pos: usize,
}

impl<'a> BytePacketBuffer<'a> {
    pub fn new(buf: &'a [u8]) -> BytePacketBuffer<'a> {
        BytePacketBuffer { buf, pos: 0 }
    }
}

impl<'a> PacketBuffer for BytePacketBuffer<'a> {
    fn len(&self) -> usize {
        self.buf.len()
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(BufferError::InsufficientData);
        }
        self.pos = pos;

        Ok(())
    }

    fn get(&self, pos: usize) -> Result<u8> {
        self.buf.get(pos).copied().ok_or(BufferError::InsufficientData)
    }

    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]> {
        let end = start.checked_add(len).ok_or(BufferError::InsufficientData)?;
        self.buf.get(start..end).ok_or(BufferError::InsufficientData)
    }

    fn write(&mut self, _: u8) -> Result<()> {
        Err(BufferError::ReadOnly)
    }

    fn set(&mut self, _: usize, _: u8) -> Result<()> {
        Err(BufferError::ReadOnly)
    }
}
