//! Bit-exact parser and serializer for a single WebSocket wire frame
//! (RFC 6455 §5.2). Deals with one frame at a time; anything that depends on
//! the sequence of frames (fragmentation, control-frame interleaving) lives
//! in [`crate::assembler`] and [`crate::connection`].

use crate::error::WsError;
use crate::extension::{self, Extension};
use crate::mask;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The six opcodes RFC 6455 defines. Any other 4-bit value is a protocol
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(self) -> bool {
        !self.is_control()
    }

    fn from_nibble(byte: u8) -> Result<Self, WsError> {
        match byte & 0x0F {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(WsError::ProtocolError(format!(
                "invalid opcode 0x{other:x}"
            ))),
        }
    }
}

/// A single WebSocket frame, post-unmasking and post-extension-decode on the
/// read path, pre-masking and pre-extension-encode on the write path.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: OpCode, data: Vec<u8>) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            data,
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(OpCode::Text, s.into().into_bytes())
    }

    pub fn binary(data: Vec<u8>) -> Self {
        Self::new(OpCode::Binary, data)
    }

    pub fn ping(data: Vec<u8>) -> Self {
        Self::new(OpCode::Ping, data)
    }

    pub fn pong(data: Vec<u8>) -> Self {
        Self::new(OpCode::Pong, data)
    }

    pub fn close(code: u16, reason: &str) -> Result<Self, WsError> {
        Ok(Self::new(OpCode::Close, crate::close::serialize(code, reason)?))
    }

    pub fn close_empty() -> Self {
        Self::new(OpCode::Close, Vec::new())
    }

    /// Validate the structural invariants from the data model: control
    /// frames are final and short; reserved bits are zero unless an
    /// extension claimed them.
    pub fn check(&self, claimed_rsv: (bool, bool, bool)) -> Result<(), WsError> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(WsError::ProtocolError(
                    "control frame must not be fragmented".into(),
                ));
            }
            if self.data.len() > 125 {
                return Err(WsError::ProtocolError(
                    "control frame payload exceeds 125 bytes".into(),
                ));
            }
        }
        if (self.rsv1 && !claimed_rsv.0)
            || (self.rsv2 && !claimed_rsv.1)
            || (self.rsv3 && !claimed_rsv.2)
        {
            return Err(WsError::ProtocolError(
                "reserved bit set without a negotiated extension claiming it".into(),
            ));
        }
        Ok(())
    }

    /// Read one frame from `reader`.
    ///
    /// `expect_mask` is `true` on the server (inbound client frames must be
    /// masked) and `false` on the client (inbound server frames must not
    /// be). `max_size` caps the declared payload length before it is read
    /// into memory at all, so an attacker can't force a large allocation
    /// merely by sending an oversize length prefix.
    pub async fn read<R>(
        reader: &mut R,
        expect_mask: bool,
        max_size: Option<u64>,
        extensions: &mut [Box<dyn Extension>],
    ) -> Result<Self, WsError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;

        let fin = head[0] & 0b1000_0000 != 0;
        let rsv1 = head[0] & 0b0100_0000 != 0;
        let rsv2 = head[0] & 0b0010_0000 != 0;
        let rsv3 = head[0] & 0b0001_0000 != 0;
        let opcode = OpCode::from_nibble(head[0])?;

        let masked = head[1] & 0b1000_0000 != 0;
        if masked != expect_mask {
            return Err(WsError::ProtocolError("incorrect masking".into()));
        }

        let mut length = (head[1] & 0b0111_1111) as u64;
        if length == 126 {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            length = u16::from_be_bytes(ext) as u64;
        } else if length == 127 {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            length = u64::from_be_bytes(ext);
            if length & 0x8000_0000_0000_0000 != 0 {
                return Err(WsError::ProtocolError(
                    "64-bit length has the MSB set".into(),
                ));
            }
        }

        if let Some(max) = max_size {
            if length > max {
                return Err(WsError::PayloadTooBig { size: length, max });
            }
        }

        let mask_key = if masked {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut data = vec![0u8; length as usize];
        reader.read_exact(&mut data).await?;

        if let Some(key) = mask_key {
            mask::mask_bytes(&mut data, key);
        }

        let mut frame = Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            data,
        };
        frame = extension::decode_chain(extensions, frame, max_size)?;
        frame.check(extension::claimed_reserved_bits(extensions))?;
        Ok(frame)
    }

    /// Serialize this frame for the wire, applying extensions in forward
    /// order and masking if `apply_mask` (true on the client). Returns a
    /// single contiguous buffer so the caller can emit it with one write
    /// call, avoiding TCP fragmentation that would let concurrent writers
    /// interleave partial frames.
    pub fn serialize(
        mut self,
        apply_mask: bool,
        extensions: &mut [Box<dyn Extension>],
    ) -> Result<Vec<u8>, WsError> {
        self = extension::encode_chain(extensions, self)?;

        let mut first_byte = (self.fin as u8) << 7;
        first_byte |= (self.rsv1 as u8) << 6;
        first_byte |= (self.rsv2 as u8) << 5;
        first_byte |= (self.rsv3 as u8) << 4;
        first_byte |= self.opcode as u8;

        let mask_key = if apply_mask {
            Some(mask::random_mask_key())
        } else {
            None
        };

        let len = self.data.len();
        let mut buf = BytesMut::with_capacity(len + 14);
        buf.put_u8(first_byte);

        let mask_bit = if mask_key.is_some() { 0x80 } else { 0x00 };
        if len < 126 {
            buf.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(len as u64);
        }

        if let Some(key) = mask_key {
            buf.put_slice(&key);
            mask::mask_bytes(&mut self.data, key);
        }
        buf.put_slice(&self.data);

        Ok(buf.to_vec())
    }

    /// Serialize and write this frame in a single transport write call.
    pub async fn write<W>(
        self,
        writer: &mut W,
        apply_mask: bool,
        extensions: &mut [Box<dyn Extension>],
    ) -> Result<(), WsError>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.serialize(apply_mask, extensions)?;
        writer.write_all(&bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip(frame: Frame, masked: bool) -> Frame {
        let bytes = frame.clone().serialize(masked, &mut []).unwrap();
        let mut cursor = std::io::Cursor::new(bytes);
        Frame::read(&mut cursor, masked, None, &mut []).await.unwrap()
    }

    #[tokio::test]
    async fn text_frame_round_trips_masked() {
        let frame = Frame::text("héllo");
        let parsed = round_trip(frame, true).await;
        assert_eq!(parsed.opcode, OpCode::Text);
        assert_eq!(parsed.data, "héllo".as_bytes());
        assert!(parsed.fin);
    }

    #[tokio::test]
    async fn binary_frame_round_trips_unmasked() {
        let frame = Frame::binary(vec![1, 2, 3, 4, 5]);
        let parsed = round_trip(frame, false).await;
        assert_eq!(parsed.data, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn length_boundaries_pick_correct_encoding() {
        for len in [125usize, 126, 65535, 65536] {
            let frame = Frame::binary(vec![0u8; len]);
            let bytes = frame.serialize(false, &mut []).unwrap();
            if len < 126 {
                assert_eq!(bytes[1], len as u8);
            } else if len <= u16::MAX as usize {
                assert_eq!(bytes[1], 126);
            } else {
                assert_eq!(bytes[1], 127);
            }
        }
    }

    #[tokio::test]
    async fn rejects_incorrect_masking_direction() {
        let frame = Frame::text("hi");
        let bytes = frame.serialize(true, &mut []).unwrap(); // masked, server expects unmasked
        let mut cursor = std::io::Cursor::new(bytes);
        let err = Frame::read(&mut cursor, false, None, &mut []).await;
        assert!(matches!(err, Err(WsError::ProtocolError(_))));
    }

    #[tokio::test]
    async fn rejects_oversize_payload_before_reading_it() {
        let frame = Frame::binary(vec![0u8; 2048]);
        let bytes = frame.serialize(false, &mut []).unwrap();
        let mut cursor = std::io::Cursor::new(bytes);
        let err = Frame::read(&mut cursor, false, Some(1024), &mut []).await;
        assert!(matches!(err, Err(WsError::PayloadTooBig { size: 2048, max: 1024 })));
    }

    #[tokio::test]
    async fn rejects_non_final_control_frame() {
        let mut frame = Frame::ping(vec![1, 2, 3]);
        frame.fin = false;
        let bytes = frame.serialize(false, &mut []).unwrap();
        let mut cursor = std::io::Cursor::new(bytes);
        let err = Frame::read(&mut cursor, false, None, &mut []).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn empty_data_frame_round_trips() {
        let frame = Frame::binary(Vec::new());
        let parsed = round_trip(frame, true).await;
        assert!(parsed.data.is_empty());
    }

    #[tokio::test]
    async fn max_control_payload_round_trips() {
        let frame = Frame::ping(vec![0xAB; 125]);
        let parsed = round_trip(frame, true).await;
        assert_eq!(parsed.data.len(), 125);
    }
}
