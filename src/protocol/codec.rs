//! Byte-level encoding helpers
//!
//! [`WireReader`] and [`WireWriter`] read and write one field at a time at an explicit
//! width in little-endian order. Packet layouts in [`super::commands`] and
//! [`super::events`] are expressed purely as sequences of these calls.
//!
//! [`DaemonCodec`] splits the socket byte stream into packet bodies and frames
//! outbound commands.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{BdAddr, Command, ProtocolError, HEADER_LEN};

/// Width of the fixed buffer behind name/color/serial strings.
pub const FIXED_STR_LEN: usize = 16;

pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn bd_addr(&mut self) -> Result<BdAddr, ProtocolError> {
        Ok(BdAddr::from_wire(self.array()?))
    }

    pub fn enumeration<T>(&mut self) -> Result<T, ProtocolError>
    where
        T: TryFrom<u8, Error = ProtocolError>,
    {
        T::try_from(self.u8()?)
    }

    /// `{length: u8, bytes[16]}`; only the first `length` bytes carry text
    pub fn fixed_str(&mut self) -> Result<String, ProtocolError> {
        let length = usize::from(self.u8()?).min(FIXED_STR_LEN);
        let raw = self.take(FIXED_STR_LEN)?;
        Ok(String::from_utf8_lossy(&raw[..length]).into_owned())
    }
}

pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new(opcode: u8) -> Self {
        let mut buf = Vec::with_capacity(32);
        buf.push(opcode);
        Self { buf }
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes(&[value])
    }

    pub fn i8(&mut self, value: i8) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.u8(u8::from(value))
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn bd_addr(&mut self, addr: BdAddr) -> &mut Self {
        self.bytes(&addr.to_wire())
    }

    pub fn enumeration(&mut self, value: impl Into<u8>) -> &mut Self {
        self.u8(value.into())
    }

    /// Writes at most 16 bytes of `text`, cut back to a char boundary
    pub fn fixed_str(&mut self, text: &str) -> &mut Self {
        let mut length = text.len().min(FIXED_STR_LEN);
        while !text.is_char_boundary(length) {
            length -= 1;
        }
        let mut raw = [0u8; FIXED_STR_LEN];
        raw[..length].copy_from_slice(&text.as_bytes()[..length]);
        // length <= 16, fits the length byte
        self.u8(length as u8);
        self.bytes(&raw)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Prepends the little-endian length header to a packet body
pub fn frame(body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if body.len() >= super::MAX_COMMAND_BODY {
        return Err(ProtocolError::FrameTooLarge { length: body.len() });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

/// Length-prefixed framing of the daemon socket
///
/// Decoding yields raw packet bodies (opcode + payload) so that a malformed packet
/// can be reported and skipped without tearing down the stream. Encoding takes
/// whole [`Command`] values.
#[derive(Debug, Default, Clone, Copy)]
pub struct DaemonCodec;

impl Decoder for DaemonCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = usize::from(u16::from_le_bytes([src[0], src[1]]));
        let total = HEADER_LEN + length;
        if src.len() < total {
            // Accumulate across partial reads
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(length)))
    }
}

impl Encoder<Command> for DaemonCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = item.encode_frame()?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
