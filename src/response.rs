use bytes::Bytes;

use crate::error::{NetCode, NetError};

/// 原始响应控制头
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseControl {
    raw: Option<String>,
}

impl ResponseControl {
    pub fn new(raw: Option<String>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }
}

/// 一次逻辑请求的响应
#[derive(Debug, Clone)]
pub struct Response {
    net_code: NetCode,
    net_message: String,
    code: i32,
    message: String,
    body: Option<Bytes>,
    compressed: bool,
    encrypt_epoch: Option<String>,
    server_time: Option<i64>,
    control: ResponseControl,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            net_code: NetCode::Ok,
            net_message: String::new(),
            code: 0,
            message: String::new(),
            body: None,
            compressed: false,
            encrypt_epoch: None,
            server_time: None,
            control: ResponseControl::default(),
        }
    }
}

impl Response {
    /// 传输成功的响应
    pub fn ok(body: Option<Bytes>) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// 本地合成的失败响应
    pub fn failure(net_code: NetCode, net_message: impl Into<String>) -> Self {
        Self {
            net_code,
            net_message: net_message.into(),
            ..Self::default()
        }
    }

    pub fn from_error(error: &NetError) -> Self {
        Self::failure(error.net_code(), error.to_string())
    }

    pub fn net_code(&self) -> NetCode {
        self.net_code
    }

    pub fn net_message(&self) -> &str {
        &self.net_message
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn encrypt_epoch(&self) -> Option<&str> {
        self.encrypt_epoch.as_deref()
    }

    pub fn server_time(&self) -> Option<i64> {
        self.server_time
    }

    pub fn control(&self) -> &ResponseControl {
        &self.control
    }

    /// 传输层成功
    pub fn is_success(&self) -> bool {
        self.net_code.is_ok()
    }

    pub fn is_timeout(&self) -> bool {
        self.net_code == NetCode::Timeout
    }

    pub fn with_body(mut self, body: Option<Bytes>) -> Self {
        self.body = body;
        self
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn with_result(mut self, code: i32, message: impl Into<String>) -> Self {
        self.code = code;
        self.message = message.into();
        self
    }

    pub fn with_encrypt_epoch(mut self, epoch: Option<String>) -> Self {
        self.encrypt_epoch = epoch;
        self
    }

    pub fn with_server_time(mut self, server_time: Option<i64>) -> Self {
        self.server_time = server_time;
        self
    }

    pub fn with_control(mut self, control: ResponseControl) -> Self {
        self.control = control;
        self
    }
}
