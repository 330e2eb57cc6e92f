//! Terminal rendering for notices and command results.

use std::io::{self, Write};
use std::path::PathBuf;

use envelope_core::{Notice, NoticeLevel, Notifier};
use serde_json::Value;

/// Prints notices to stderr so stdout carries nothing but payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn show(&self, notice: Notice) {
        eprintln!("{}", render_notice(&notice));
    }
}

pub fn render_notice(notice: &Notice) -> String {
    let label = match notice.level {
        NoticeLevel::Success => "ok",
        NoticeLevel::Warning => "warning",
        NoticeLevel::Error => "error",
    };
    format!("[{label}] {}", notice.message)
}

/// What a command produced.
#[derive(Debug, PartialEq)]
pub enum Output {
    Json(Value),
    Saved { path: PathBuf, bytes: usize },
}

impl Output {
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        match self {
            Output::Json(value) => {
                let rendered = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
                writeln!(out, "{rendered}")
            }
            Output::Saved { path, bytes } => writeln!(out, "saved {bytes} bytes to {}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn notice_carries_level_label() {
        assert_eq!(render_notice(&Notice::error("请求超时")), "[error] 请求超时");
        assert_eq!(render_notice(&Notice::success("saved")), "[ok] saved");
    }

    #[test]
    fn json_output_is_pretty_printed() {
        let mut buf = Vec::new();
        Output::Json(json!({"id": 1})).write_to(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "{\n  \"id\": 1\n}\n");
    }

    #[test]
    fn saved_output_names_the_file() {
        let mut buf = Vec::new();
        Output::Saved {
            path: PathBuf::from("/tmp/report.pdf"),
            bytes: 42,
        }
        .write_to(&mut buf)
        .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "saved 42 bytes to /tmp/report.pdf\n");
    }
}
