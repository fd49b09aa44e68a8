//! # frame 模块说明
//!
//! ## 角色定位（Why）
//! - 把编解码器产出的负载包装成长度前缀帧，使任意字节流传输都能按帧重组；
//! - 帧布局是跨进程兼容边界，头部尺寸与长度字段宽度为协议常量，变更必须提升版本号。
//!
//! ## 帧布局（What，大端序）
//! | 偏移 | 长度 | 字段 |
//! |------|------|------|
//! | 0    | 2    | 魔数 `0xF1F1` |
//! | 2    | 1    | 协议版本 `1` |
//! | 3    | 1    | 消息类型：0 请求 / 1 响应 / 2 单向请求 |
//! | 4    | 8    | 请求号 |
//! | 12   | 4    | 负载长度 |
//! | 16   | N    | 负载 |
//!
//! ## 执行逻辑（How）
//! - [`FrameDecoder`] 在头部到齐后立即校验魔数、版本、类型与长度上限，违规即返回
//!   [`ProtocolError`]，由连接方关闭连接，绝不尝试跳过坏数据；
//! - 负载未到齐时不消费任何字节，仅预留容量等待下一次读取。

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::Codec;
use crate::error::{RpcError, codes};
use crate::message::{Message, MessageRef, MessageType};
use crate::url::{Url, UrlParam};

/// 帧头长度（字节）。
pub const HEADER_LEN: usize = 16;
/// 协议魔数。
pub const MAGIC: u16 = 0xF1F1;
/// 协议版本。
pub const VERSION: u8 = 1;

/// 线协议违规。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// 魔数不匹配，通常意味着对端不是本协议。
    #[error("bad frame magic 0x{found:04x}")]
    BadMagic { found: u16 },

    /// 不支持的协议版本。
    #[error("unsupported frame version {found}")]
    UnsupportedVersion { found: u8 },

    /// 未知消息类型标记。
    #[error("unknown message type tag {tag}")]
    UnknownMessageType { tag: u8 },

    /// 负载长度超过上限。
    #[error("frame payload of {length} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::FrameTooLarge { .. } => codes::PROTOCOL_FRAME_TOO_LARGE,
            _ => codes::PROTOCOL_DECODE,
        }
    }
}

impl From<ProtocolError> for RpcError {
    fn from(err: ProtocolError) -> Self {
        RpcError::Protocol {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// 一个完整的已重组帧。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub request_id: u64,
    pub payload: Bytes,
}

/// 把头部与负载写入目标缓冲区。
pub fn encode_frame(
    message_type: MessageType,
    request_id: u64,
    payload: &[u8],
    max_content_length: usize,
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    if payload.len() > max_content_length || u32::try_from(payload.len()).is_err() {
        return Err(ProtocolError::FrameTooLarge {
            length: payload.len(),
            max: max_content_length,
        });
    }
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_u16(MAGIC);
    dst.put_u8(VERSION);
    dst.put_u8(message_type.as_u8());
    dst.put_u64(request_id);
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// 长度前缀的流式帧解码器。
#[derive(Clone, Debug)]
pub struct FrameDecoder {
    max_content_length: usize,
}

impl FrameDecoder {
    pub fn new(max_content_length: usize) -> Self {
        Self { max_content_length }
    }

    /// 以 URL 参数 `maxContentLength` 为上限构造。
    pub fn from_url(url: &Url) -> Self {
        Self::new(max_content_length(url))
    }

    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// 尝试从缓冲区切出一帧；数据不足时返回 `Ok(None)` 且不消费字节。
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &src[..HEADER_LEN];
        let magic = header.get_u16();
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic { found: magic });
        }
        let version = header.get_u8();
        if version != VERSION {
            return Err(ProtocolError::UnsupportedVersion { found: version });
        }
        let tag = header.get_u8();
        let message_type =
            MessageType::from_u8(tag).ok_or(ProtocolError::UnknownMessageType { tag })?;
        let request_id = header.get_u64();
        let length = header.get_u32() as usize;
        if length > self.max_content_length {
            return Err(ProtocolError::FrameTooLarge {
                length,
                max: self.max_content_length,
            });
        }

        let total = HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(Frame {
            message_type,
            request_id,
            payload,
        }))
    }
}

/// 读取端点的负载上限。
pub fn max_content_length(url: &Url) -> usize {
    usize::try_from(url.int_param(UrlParam::MaxContentLength).max(0)).unwrap_or(usize::MAX)
}

/// 编码消息并写成完整帧。
pub fn encode_message(
    codec: &dyn Codec,
    url: &Url,
    message: MessageRef<'_>,
) -> Result<Bytes, RpcError> {
    let payload = codec.encode(url, message)?;
    let mut dst = BytesMut::with_capacity(HEADER_LEN + payload.len());
    encode_frame(
        message.message_type(),
        message.request_id(),
        &payload,
        max_content_length(url),
        &mut dst,
    )?;
    Ok(dst.freeze())
}

/// 解码一帧负载。
pub fn decode_message(codec: &dyn Codec, url: &Url, frame: &Frame) -> Result<Message, RpcError> {
    codec.decode(url, frame.message_type, &frame.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(tag: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u16(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(tag);
        buf.put_u64(42);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        buf
    }

    /// 负载未到齐时不产出帧，也不消费字节。
    #[test]
    fn partial_frames_wait_for_payload() {
        let full = frame_bytes(0, b"hello");
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&full[..HEADER_LEN + 2]);
        assert_eq!(decoder.decode(&mut buf).expect("未违规"), None);
        assert_eq!(buf.len(), HEADER_LEN + 2);

        buf.extend_from_slice(&full[HEADER_LEN + 2..]);
        let frame = decoder.decode(&mut buf).expect("未违规").expect("帧已完整");
        assert_eq!(frame.request_id, 42);
        assert_eq!(frame.message_type, MessageType::Request);
        assert_eq!(&frame.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    /// 头部到齐即可判定超长，无需等待负载。
    #[test]
    fn oversize_is_rejected_at_header() {
        let full = frame_bytes(1, &[0_u8; 64]);
        let mut decoder = FrameDecoder::new(16);
        let mut buf = BytesMut::from(&full[..HEADER_LEN]);
        assert_eq!(
            decoder.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { length: 64, max: 16 })
        );
    }

    /// 魔数与类型标记非法时报告协议错误。
    #[test]
    fn malformed_headers_are_rejected() {
        let mut decoder = FrameDecoder::new(1024);
        let mut bad_tag = frame_bytes(9, b"");
        assert_eq!(
            decoder.decode(&mut bad_tag),
            Err(ProtocolError::UnknownMessageType { tag: 9 })
        );
        let mut bad_magic = frame_bytes(0, b"");
        bad_magic[0] = 0;
        assert!(matches!(
            decoder.decode(&mut bad_magic),
            Err(ProtocolError::BadMagic { .. })
        ));
    }

    /// 编码端同样拒绝超长负载。
    #[test]
    fn encoder_rejects_oversize_payload() {
        let mut dst = BytesMut::new();
        let err = encode_frame(MessageType::Response, 1, &[0; 10], 4, &mut dst)
            .expect_err("超长负载必须失败");
        assert_eq!(err.code(), codes::PROTOCOL_FRAME_TOO_LARGE);
        assert!(dst.is_empty());
    }
}
