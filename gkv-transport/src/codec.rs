//! Length-prefixed message framing (§4.11): `u16 BE len || payload`. The
//! payload encoder is pluggable behind [`CodecId`]; the workspace ships
//! exactly one, a hand-rolled binary layout, so a cluster never has to
//! agree on a schema-compiler version to interoperate.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use gkv_common::CodecId;

use crate::error::TransportError;

/// Frames larger than this are unsupported: the length prefix is a `u16`.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub seq: u64,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBody {
    pub seq: u64,
    pub value: Vec<u8>,
    pub err: String,
}

/// Binds to a bidirectional byte stream and frames request/response
/// messages. `seq = 0` is reserved for a future heartbeat and is never
/// produced by [`crate::connection::PeerConnection::call`], but the codec
/// itself places no restriction on it — the server echoes back whatever
/// `seq` it reads.
pub struct FramedCodec {
    codec_id: CodecId,
}

impl FramedCodec {
    pub fn new(codec_id: CodecId) -> Self {
        FramedCodec { codec_id }
    }

    pub fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    pub async fn write_request<W: AsyncWriteExt + Unpin>(
        &self,
        w: &mut W,
        msg: &RequestBody,
    ) -> Result<(), TransportError> {
        let payload = encode_request(self.codec_id, msg)?;
        write_frame(w, &payload).await
    }

    pub async fn read_request<R: AsyncReadExt + Unpin>(
        &self,
        r: &mut R,
    ) -> Result<RequestBody, TransportError> {
        let payload = read_frame(r).await?;
        decode_request(self.codec_id, &payload)
    }

    pub async fn write_response<W: AsyncWriteExt + Unpin>(
        &self,
        w: &mut W,
        msg: &ResponseBody,
    ) -> Result<(), TransportError> {
        let payload = encode_response(self.codec_id, msg)?;
        write_frame(w, &payload).await
    }

    pub async fn read_response<R: AsyncReadExt + Unpin>(
        &self,
        r: &mut R,
    ) -> Result<ResponseBody, TransportError> {
        let payload = read_frame(r).await?;
        decode_response(self.codec_id, &payload)
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(w: &mut W, payload: &[u8]) -> Result<(), TransportError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }
    // A single buffered write delivers length prefix and payload as one
    // framed unit (§4.11: "encoders MUST buffer and flush explicitly").
    let mut framed = BytesMut::with_capacity(2 + payload.len());
    framed.put_u16(payload.len() as u16);
    framed.put_slice(payload);
    w.write_all(&framed).await?;
    w.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<Vec<u8>, TransportError> {
    let len = r.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

fn encode_request(codec_id: CodecId, msg: &RequestBody) -> Result<Vec<u8>, TransportError> {
    match codec_id {
        CodecId::Binary => {
            let key_bytes = msg.key.as_bytes();
            let mut buf = BytesMut::with_capacity(8 + 4 + key_bytes.len());
            buf.put_u64(msg.seq);
            buf.put_u32(key_bytes.len() as u32);
            buf.put_slice(key_bytes);
            Ok(buf.to_vec())
        }
    }
}

fn decode_request(codec_id: CodecId, payload: &[u8]) -> Result<RequestBody, TransportError> {
    match codec_id {
        CodecId::Binary => {
            let mut buf = payload;
            if buf.remaining() < 12 {
                return Err(TransportError::Decode("request truncated".into()));
            }
            let seq = buf.get_u64();
            let key_len = buf.get_u32() as usize;
            if buf.remaining() < key_len {
                return Err(TransportError::Decode("request key truncated".into()));
            }
            let key = String::from_utf8(buf[..key_len].to_vec())
                .map_err(|_| TransportError::Decode("request key is not utf-8".into()))?;
            Ok(RequestBody { seq, key })
        }
    }
}

fn encode_response(codec_id: CodecId, msg: &ResponseBody) -> Result<Vec<u8>, TransportError> {
    match codec_id {
        CodecId::Binary => {
            let err_bytes = msg.err.as_bytes();
            let mut buf = BytesMut::with_capacity(8 + 4 + msg.value.len() + 4 + err_bytes.len());
            buf.put_u64(msg.seq);
            buf.put_u32(msg.value.len() as u32);
            buf.put_slice(&msg.value);
            buf.put_u32(err_bytes.len() as u32);
            buf.put_slice(err_bytes);
            Ok(buf.to_vec())
        }
    }
}

fn decode_response(codec_id: CodecId, payload: &[u8]) -> Result<ResponseBody, TransportError> {
    match codec_id {
        CodecId::Binary => {
            let mut buf = payload;
            if buf.remaining() < 12 {
                return Err(TransportError::Decode("response truncated".into()));
            }
            let seq = buf.get_u64();
            let value_len = buf.get_u32() as usize;
            if buf.remaining() < value_len + 4 {
                return Err(TransportError::Decode("response value truncated".into()));
            }
            let value = buf[..value_len].to_vec();
            buf.advance(value_len);
            let err_len = buf.get_u32() as usize;
            if buf.remaining() < err_len {
                return Err(TransportError::Decode("response err truncated".into()));
            }
            let err = String::from_utf8(buf[..err_len].to_vec())
                .map_err(|_| TransportError::Decode("response err is not utf-8".into()))?;
            Ok(ResponseBody { seq, value, err })
        }
    }
}
