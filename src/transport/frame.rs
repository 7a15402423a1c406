//! 长连接帧格式
//!
//! 20 字节固定头部（大端序），随后是扩展头（JSON 编码的头部表）和负载：
//!
//! ```text
//! [version:1][kind:1][flags:1][encoding:1][seq_id:8][header_len:4][body_len:4][headers][body]
//! ```

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::ContentEncoding;
use crate::error::CodecError;

pub const FRAME_VERSION: u8 = 1;
pub const FIXED_HEADER_LEN: usize = 20;

/// 推送帧中携带通知包名的头
pub const HEADER_NOTIFY_PACKAGE: &str = "notify-package";

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// 请求（需要回复）
    Request = 1,
    /// 回复
    Response = 2,
    /// 服务端主动推送
    Push = 3,
}

impl TryFrom<u8> for FrameKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameKind::Request),
            2 => Ok(FrameKind::Response),
            3 => Ok(FrameKind::Push),
            other => Err(CodecError::Frame(format!("unknown frame kind {}", other))),
        }
    }
}

/// 标志位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub fn new() -> Self {
        Self(0)
    }

    /// 设置压缩标志
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        if compressed {
            self.0 |= 0x01;
        } else {
            self.0 &= !0x01;
        }
        self
    }

    pub fn is_compressed(&self) -> bool {
        (self.0 & 0x01) != 0
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn from_raw(value: u8) -> Self {
        Self(value)
    }
}

/// 长连接上的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub flags: FrameFlags,
    pub encoding: ContentEncoding,
    pub seq_id: i64,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, seq_id: i64) -> Self {
        Self {
            kind,
            flags: FrameFlags::new(),
            encoding: ContentEncoding::default(),
            seq_id,
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.flags = self.flags.with_compressed(compressed);
        self
    }

    pub fn with_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// 序列化 (大端序)
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let ext_header = if self.headers.is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(&self.headers).map_err(|e| CodecError::Encode(e.to_string()))?
        };

        let mut buf = BytesMut::with_capacity(FIXED_HEADER_LEN + ext_header.len() + self.body.len());
        buf.put_u8(FRAME_VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.flags.raw());
        buf.put_u8(self.encoding.tag());
        buf.put_i64(self.seq_id);
        buf.put_u32(ext_header.len() as u32);
        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&ext_header);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    /// 反序列化
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(CodecError::Frame(format!("frame too short: {} bytes", bytes.len())));
        }
        if bytes[0] != FRAME_VERSION {
            return Err(CodecError::Frame(format!("unsupported frame version {}", bytes[0])));
        }

        let kind = FrameKind::try_from(bytes[1])?;
        let flags = FrameFlags::from_raw(bytes[2]);
        let encoding = ContentEncoding::from_tag(bytes[3]);

        let mut seq = [0u8; 8];
        seq.copy_from_slice(&bytes[4..12]);
        let seq_id = i64::from_be_bytes(seq);
        let header_len = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
        let body_len = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]) as usize;

        let expected = FIXED_HEADER_LEN + header_len + body_len;
        if bytes.len() != expected {
            return Err(CodecError::Frame(format!(
                "frame length mismatch: expected {} bytes, got {}",
                expected,
                bytes.len()
            )));
        }

        let header_end = FIXED_HEADER_LEN + header_len;
        let headers = if header_len == 0 {
            BTreeMap::new()
        } else {
            serde_json::from_slice(&bytes[FIXED_HEADER_LEN..header_end])?
        };

        Ok(Self {
            kind,
            flags,
            encoding,
            seq_id,
            headers,
            body: Bytes::copy_from_slice(&bytes[header_end..]),
        })
    }
}
