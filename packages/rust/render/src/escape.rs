//! Escaping of untrusted text into Typst source.

/// Characters with meaning in Typst markup.
const MARKUP_SPECIALS: &[char] = &[
    '\\', '#', '*', '_', '$', '@', '<', '>', '[', ']', '`', '~', '/', '=', '-', '+',
];

/// Escape text for use inside a Typst string literal.
///
/// Backslash first, then double quote; control characters become escapes.
pub fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Escape text for use as Typst markup on a single line.
///
/// A leading `12.` would start a numbered list, so its dot is escaped.
pub fn escape_markup(text: &str) -> String {
    let enum_dot = enumeration_dot(text);
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        match c {
            '\n' | '\r' | '\t' => out.push(' '),
            '.' if Some(i) == enum_dot => out.push_str("\\."),
            c if MARKUP_SPECIALS.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Byte offset of the dot in a leading `<digits>.` list marker.
fn enumeration_dot(text: &str) -> Option<usize> {
    let body = text.trim_start();
    let digits = body.len() - body.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let offset = text.len() - body.len() + digits;
    (digits > 0 && text[offset..].starts_with('.')).then_some(offset)
}
