use bytes::Bytes;

use crate::codec::ContentEncoding;

/// 服务端推送消息
///
/// 解密、解压阶段通过 `with_*` 产生新值传递转换后的负载。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    url: String,
    notify_package: String,
    body: Bytes,
    compressed: bool,
    content_encoding: ContentEncoding,
}

impl PushMessage {
    pub fn new(url: impl Into<String>, notify_package: impl Into<String>, body: Bytes) -> Self {
        Self {
            url: url.into(),
            notify_package: notify_package.into(),
            body,
            compressed: false,
            content_encoding: ContentEncoding::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 区分密钥轮换控制消息与普通推送
    pub fn notify_package(&self) -> &str {
        &self.notify_package
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn content_encoding(&self) -> ContentEncoding {
        self.content_encoding
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn with_content_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.content_encoding = encoding;
        self
    }
}
