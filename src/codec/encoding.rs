use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CodecError;

/// 载荷编码方式
///
/// 封闭枚举，编码 / 解码 / 媒体类型都在这里按分支分派
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContentEncoding {
    /// 二进制协议（bincode）
    #[default]
    Binary,
    /// 文本协议（JSON）
    Json,
}

impl ContentEncoding {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            ContentEncoding::Binary => bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string())),
            ContentEncoding::Json => serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string())),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            ContentEncoding::Binary => Ok(bincode::deserialize(bytes)?),
            ContentEncoding::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// `Content-Type` / `Accept` 使用的媒体类型
    pub fn media_type(self) -> &'static str {
        match self {
            ContentEncoding::Binary => "application/octet-stream",
            ContentEncoding::Json => "application/json",
        }
    }

    /// 线上标记，用于帧头和推送消息
    pub fn tag(self) -> u8 {
        match self {
            ContentEncoding::Binary => 0,
            ContentEncoding::Json => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            1 => ContentEncoding::Json,
            _ => ContentEncoding::Binary,
        }
    }
}
