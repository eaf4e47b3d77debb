//! Log processing - truncation and HTML-safe rendering
//!
//! Raw tool output is classified elsewhere; this module only prepares the
//! text that gets stored on a check result:
//! - `truncated_log`: clip overlong output and report that it happened
//! - `escape`: make the text safe to embed in an HTML log viewer
//!
//! The log processor does NOT:
//! - Decide pass/fail (classification works on the raw, unprocessed text)
//! - Apply framework-specific cleanup or markup (see `classify`)

/// Notice prepended to a result log when the run hit the time limit.
pub const TIMEOUT_NOTICE: &str = "<div class=\"error\">Timeout occurred!</div>";
/// Notice prepended to a result log when the run was killed out of memory.
pub const OOM_NOTICE: &str = "<div class=\"error\">Out of memory!</div>";
/// Notice prepended to a result log when the output had to be truncated.
pub const TRUNCATION_NOTICE: &str = "<div class=\"error\">Output too long, truncated!</div>";

/// Clip a log to at most `max_chars` characters.
///
/// Returns the (possibly clipped) text and whether clipping happened.
/// The cut lands on a character boundary, never inside a multi-byte
/// sequence.
pub fn truncated_log(log: &str, max_chars: usize) -> (String, bool) {
    match log.char_indices().nth(max_chars) {
        Some((byte_pos, _)) => (log[..byte_pos].to_string(), true),
        None => (log.to_string(), false),
    }
}

/// Escape text for embedding into an HTML log.
///
/// Same character set as the web frontend expects: `& < > " '`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap already-escaped text in a `<pre>` block.
pub fn pre_block(escaped: &str) -> String {
    format!("<pre>{}</pre>", escaped)
}
