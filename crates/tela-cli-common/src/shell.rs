/// Escape `s` for consumption inside shell single quotes.
pub fn escape_single(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\'' => out.push_str("'\\''"),
            '\n' => out.push_str("'\"\\n\"'"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape `s` for consumption inside shell double quotes, so that emitted
/// `KEY="VALUE"` lines can be sourced by a shell.
pub fn escape_double(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '$' => out.push_str("\\$"),
            '"' => out.push_str("\\\""),
            '`' => out.push_str("\\`"),
            _ => out.push(c),
        }
    }
    out
}

/// Reversal of [`escape_double`].
pub fn unescape_double(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other @ ('$' | '"' | '`' | '\\')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_quote_escaping() {
        assert_eq!(escape_single("it's"), "it'\\''s");
        assert_eq!(escape_single("a\nb"), "a'\"\\n\"'b");
    }

    #[test]
    fn double_quote_escaping_round_trips() {
        let original = "a\"b`c$d\\e\nf";
        assert_eq!(unescape_double(&escape_double(original)), original);
    }

    #[test]
    fn unknown_escapes_are_kept() {
        assert_eq!(unescape_double("a\\xb"), "a\\xb");
    }
}
