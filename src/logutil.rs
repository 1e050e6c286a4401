//! Helpers that keep player-supplied text and long error lists on one log line.

const MAX_PREVIEW: usize = 120;

/// Escape control characters in a player-controlled string (names, item ids)
/// and cap its length so a single log line stays readable.
pub fn escape_log(s: &str) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 4);
    for (count, ch) in s.chars().enumerate() {
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

/// Join per-item failures from a batch job into one line: the first `shown`
/// entries verbatim, then a count of the rest.
pub fn summarize_errors(errors: &[String], shown: usize) -> String {
    if errors.is_empty() {
        return "no errors".to_string();
    }
    let mut parts: Vec<String> = errors.iter().take(shown).map(|e| escape_log(e)).collect();
    if errors.len() > shown {
        parts.push(format!("(+{} more)", errors.len() - shown));
    }
    parts.join("; ")
}
