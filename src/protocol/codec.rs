use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{DecodeError, Error};
use super::message::{Direction, Message};
use super::MAX_FRAME_SIZE;

/// Fails with `Truncated` unless `src` holds at least `needed` bytes
pub(crate) fn ensure(src: &[u8], needed: usize) -> Result<(), DecodeError> {
    if src.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            remaining: src.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_u8(src: &mut &[u8]) -> Result<u8, DecodeError> {
    ensure(*src, 1)?;
    Ok(src.get_u8())
}

pub(crate) fn read_u16(src: &mut &[u8]) -> Result<u16, DecodeError> {
    ensure(*src, 2)?;
    Ok(src.get_u16_le())
}

pub(crate) fn read_u32(src: &mut &[u8]) -> Result<u32, DecodeError> {
    ensure(*src, 4)?;
    Ok(src.get_u32_le())
}

pub(crate) fn read_u64(src: &mut &[u8]) -> Result<u64, DecodeError> {
    ensure(*src, 8)?;
    Ok(src.get_u64_le())
}

/// Rejects bytes left over once a body has been read
pub(crate) fn finish(src: &[u8]) -> Result<(), DecodeError> {
    if src.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::TrailingBytes(src.len()))
    }
}

/// Length-prefixed framing for byte-stream links (UART bridges).
///
/// Each frame is a little-endian `u16` length followed by the id header and
/// body. The codec decodes one direction and encodes whatever it is given.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    inbound: Direction,
}

impl MessageCodec {
    /// Creates a codec decoding frames that travel in `inbound` direction
    pub fn new(inbound: Direction) -> Self {
        MessageCodec { inbound }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        MessageCodec::new(Direction::SlaveToMaster)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            // Need more data to read frame length
            return Ok(None);
        }

        let length = u16::from_le_bytes([src[0], src[1]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(DecodeError::Oversized(length).into());
        }

        if src.len() < 2 + length {
            src.reserve(2 + length - src.len());
            return Ok(None);
        }

        src.advance(2);
        let frame = src.split_to(length);

        Ok(Some(Message::deserialize(self.inbound, &frame)?))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = item.serialize();
        if frame.len() > MAX_FRAME_SIZE {
            return Err(DecodeError::Oversized(frame.len()).into());
        }

        dst.reserve(2 + frame.len());
        dst.put_u16_le(frame.len() as u16);
        dst.extend_from_slice(&frame);

        Ok(())
    }
}
