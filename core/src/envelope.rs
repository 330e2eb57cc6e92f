//! The business envelope the server wraps every JSON payload in.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Business code that marks a successful call.
pub const SUCCESS_CODE: i64 = 200;

/// `{code, message, data}` wrapper returned by the server.
///
/// `code` is the business status and is unrelated to the HTTP status. Some
/// servers send it as a string (`"200"`); numeric strings are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(deserialize_with = "code_from_number_or_string")]
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

fn code_from_number_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCode {
        Number(i64),
        Text(String),
    }

    match RawCode::deserialize(deserializer)? {
        RawCode::Number(code) => Ok(code),
        RawCode::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("business code {text:?} is not an integer"))),
    }
}
