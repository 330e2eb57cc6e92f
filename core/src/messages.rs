//! Fixed user-facing strings for business codes and HTTP statuses.

use crate::error::TransportErrorKind;

pub const UNKNOWN_ERROR: &str = "未知错误";
pub const NETWORK_ERROR: &str = "网络连接异常，请稍后重试！";
pub const TIMEOUT: &str = "接口请求超时,请刷新页面重试!";
pub const EMPTY_RESPONSE: &str = "data为空，服务异常，没有数据返回！";
pub const REQUEST_SUCCEEDED: &str = "网络请求成功！";
pub const DUPLICATE_CANCELLED: &str = "重复请求被取消";
pub const ALL_CANCELLED: &str = "所有请求已取消";

/// Message for a failing business code.
///
/// Known codes win over whatever the server sent; otherwise the server's
/// message is used when it is non-blank.
pub fn business_message(code: i64, server_message: Option<&str>) -> String {
    let mapped = match code {
        401 => Some("登录已过期，请重新登录"),
        403 => Some("您没有权限操作"),
        500 => Some("服务器异常，请联系管理员"),
        _ => None,
    };
    if let Some(mapped) = mapped {
        return mapped.to_string();
    }
    match server_message.map(str::trim) {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => UNKNOWN_ERROR.to_string(),
    }
}

/// Message for a non-2xx HTTP status.
pub fn http_status_message(status: u16) -> &'static str {
    match status {
        400 => "请求错误",
        401 => "未授权，请重新登录",
        403 => "拒绝访问",
        404 => "请求的资源不存在",
        408 => "请求超时",
        500 => "服务器内部错误",
        501 => "服务未实现",
        502 => "网关错误",
        503 => "服务不可用",
        504 => "网关超时",
        505 => "HTTP版本不受支持",
        _ => UNKNOWN_ERROR,
    }
}

/// Message for a request that never received a response.
pub fn transport_message(kind: TransportErrorKind) -> &'static str {
    match kind {
        TransportErrorKind::Timeout => TIMEOUT,
        TransportErrorKind::Connect | TransportErrorKind::Other | TransportErrorKind::Body => NETWORK_ERROR,
        TransportErrorKind::Request => UNKNOWN_ERROR,
    }
}
