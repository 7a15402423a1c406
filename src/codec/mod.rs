//! 编解码工具：gzip 压缩、二进制 / 文本协议编码、头部值编码

pub mod compression;
pub mod encoding;
pub mod header;

pub use compression::{Compressor, GzipCompressor};
pub use encoding::ContentEncoding;
pub use header::{
    decode_header_value, decode_structured, encode_header_value, encode_structured, PublicParams, ResponseControlHeader, RoutingUpdate,
    HEADER_ACCEPT, HEADER_AUTH_TOKEN, HEADER_CONTENT_TYPE, HEADER_PUBLIC_PARAMS,
    HEADER_REQUEST_CONTROL, HEADER_RESPONSE_CONTROL,
};
