use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::ContentEncoding;
use crate::error::CodecError;

pub const HEADER_AUTH_TOKEN: &str = "X-Auth-Token";
pub const HEADER_PUBLIC_PARAMS: &str = "X-Public-Params";
pub const HEADER_REQUEST_CONTROL: &str = "X-Request-Control";
pub const HEADER_RESPONSE_CONTROL: &str = "X-Response-Control";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_ACCEPT: &str = "Accept";

/// 公共参数，每个请求都会携带
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicParams {
    pub app_id: String,
    pub app_version: String,
    pub platform: String,
    pub device_id: String,
    pub language: String,
}

/// 服务端下发的路由键更新
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingUpdate {
    pub service: String,
    pub routing_key: String,
}

/// 响应控制头的结构化内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseControlHeader {
    pub code: i32,
    pub message: String,
    pub encrypt_epoch: Option<String>,
    pub server_time: Option<i64>,
    pub compressed: bool,
    pub routing: Option<RoutingUpdate>,
}

/// 字节 -> base64 文本，保证可以放进任何传输头
pub fn encode_header_value(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_header_value(value: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(value.trim())?)
}

/// 结构体 -> 编码 -> base64 头部值
pub fn encode_structured<T: Serialize>(encoding: ContentEncoding, value: &T) -> Result<String, CodecError> {
    let bytes = encoding.encode(value)?;
    Ok(encode_header_value(&bytes))
}

pub fn decode_structured<T: DeserializeOwned>(encoding: ContentEncoding, value: &str) -> Result<T, CodecError> {
    let bytes = decode_header_value(value)?;
    encoding.decode(&bytes)
}
