//! Helpers for logging raw bus payloads without letting them break the
//! one-line-per-event contract: control characters are escaped and long
//! payloads truncated.

/// Render untrusted input as a single log-safe line. Newlines, carriage
/// returns, tabs and backslashes become escape sequences, other control
/// characters become `\xNN`, and anything past `MAX_PREVIEW` characters is
/// replaced by an ellipsis.
pub fn escape_log(input: &str) -> String {
    const MAX_PREVIEW: usize = 200;
    use std::fmt::Write;

    let mut out = String::with_capacity(input.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in input.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_log;

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_log("a\nb\r\tc\\d"), "a\\nb\\r\\tc\\\\d");
        assert_eq!(escape_log("x\u{1}y"), "x\\x01y");
    }

    #[test]
    fn truncates_long_payloads() {
        let long = "z".repeat(500);
        let escaped = escape_log(&long);
        assert!(escaped.ends_with('…'));
        assert!(escaped.chars().count() <= 201);
    }
}
