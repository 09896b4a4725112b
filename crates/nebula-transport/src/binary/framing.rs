use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The two wire versions of the legacy binary-framed protocol, differing in
/// the width of every length prefix: v1.0 uses 16-bit chunk/frame lengths
/// (capping a single chunk at 64KiB), v1.1 widens them to 32 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireVersion {
    V1_0,
    V1_1,
}

impl WireVersion {
    fn header_width(self) -> usize {
        match self {
            WireVersion::V1_0 => 2,
            WireVersion::V1_1 => 4,
        }
    }
}

/// One correlated message: a header frame (method/path/headers, or
/// status/headers on the response side, JSON-encoded) followed by a payload
/// frame (the request or response body).
#[derive(Clone, Debug)]
pub struct Frame {
    pub message_id: u64,
    pub header: Bytes,
    pub payload: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("io error decoding frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

impl From<FrameError> for std::io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => err,
            FrameError::Malformed(reason) => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, reason)
            }
        }
    }
}

pub struct VelocystreamCodec {
    version: WireVersion,
}

impl VelocystreamCodec {
    pub fn new(version: WireVersion) -> Self {
        Self { version }
    }

    fn read_len(&self, buf: &[u8]) -> u64 {
        match self.version {
            WireVersion::V1_0 => LittleEndian::read_u16(buf) as u64,
            WireVersion::V1_1 => LittleEndian::read_u32(buf) as u64,
        }
    }

    fn write_len(&self, dst: &mut BytesMut, len: u64) {
        match self.version {
            WireVersion::V1_0 => dst.put_u16_le(len as u16),
            WireVersion::V1_1 => dst.put_u32_le(len as u32),
        }
    }
}

impl Encoder<Frame> for VelocystreamCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let width = self.version.header_width();
        let body_len = 8 + width + frame.header.len() + width + frame.payload.len();

        dst.reserve(width + body_len);
        self.write_len(dst, body_len as u64);
        dst.put_u64_le(frame.message_id);
        self.write_len(dst, frame.header.len() as u64);
        dst.put_slice(&frame.header);
        self.write_len(dst, frame.payload.len() as u64);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for VelocystreamCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        let width = self.version.header_width();
        if src.len() < width {
            return Ok(None);
        }

        let body_len = self.read_len(&src[..width]) as usize;
        let total = width + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut chunk = src.split_to(total);
        chunk.advance(width);

        if chunk.remaining() < 8 {
            return Err(FrameError::Malformed("frame too short for message id").into());
        }
        let message_id = chunk.get_u64_le();

        if chunk.remaining() < width {
            return Err(FrameError::Malformed("truncated header length").into());
        }
        let header_len = self.read_len(&chunk[..width]) as usize;
        chunk.advance(width);
        if chunk.remaining() < header_len {
            return Err(FrameError::Malformed("truncated header frame").into());
        }
        let header = chunk.split_to(header_len).freeze();

        if chunk.remaining() < width {
            return Err(FrameError::Malformed("truncated payload length").into());
        }
        let payload_len = self.read_len(&chunk[..width]) as usize;
        chunk.advance(width);
        if chunk.remaining() < payload_len {
            return Err(FrameError::Malformed("truncated payload frame").into());
        }
        let payload = chunk.split_to(payload_len).freeze();

        Ok(Some(Frame {
            message_id,
            header,
            payload,
        }))
    }
}
