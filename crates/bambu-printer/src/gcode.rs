//! Pre-flight checks for raw G-code lines.
//!
//! This is a filter against typos, not a grammar: a line passes when it
//! starts with a `G`/`M` word and every following token is a letter with
//! a plain decimal number.

use crate::error::{BambuError, Result};

/// Whether `line` looks like a sendable G-code command.
pub fn is_valid_line(line: &str) -> bool {
    let code = match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let mut tokens = code.split_whitespace();

    match tokens.next() {
        Some(head) if is_command_word(head) => tokens.all(is_parameter),
        _ => false,
    }
}

/// Check every line, failing on the first one that does not pass.
pub fn validate_lines<S: AsRef<str>>(lines: &[S]) -> Result<()> {
    for (idx, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if !is_valid_line(line) {
            return Err(BambuError::InvalidGcode(format!(
                "line {}: {:?}",
                idx + 1,
                line
            )));
        }
    }
    Ok(())
}

/// `G` or `M` directly followed by at least one digit.
fn is_command_word(token: &str) -> bool {
    let bytes = token.as_bytes();
    matches!(bytes.first(), Some(b'G' | b'M'))
        && bytes.get(1).is_some_and(u8::is_ascii_digit)
}

/// `[A-Z]-?\d+(\.\d+)?`
fn is_parameter(token: &str) -> bool {
    let bytes = token.as_bytes();
    let Some((letter, rest)) = bytes.split_first() else {
        return false;
    };
    if !letter.is_ascii_uppercase() {
        return false;
    }

    let rest = rest.strip_prefix(b"-").unwrap_or(rest);
    let (whole, fraction) = match rest.iter().position(|b| *b == b'.') {
        Some(dot) => (&rest[..dot], Some(&rest[dot + 1..])),
        None => (rest, None),
    };

    let digits = |part: &[u8]| !part.is_empty() && part.iter().all(u8::is_ascii_digit);
    digits(whole) && fraction.map_or(true, digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_lines() {
        assert!(is_valid_line("G1 X10 Y-5.5"));
        assert!(is_valid_line("G28"));
        assert!(is_valid_line("M104 S220"));
        assert!(is_valid_line("  G1 X1\tY2  "));
        assert!(is_valid_line("M106 P1 S255 ; part fan"));
        assert!(is_valid_line("G0 Z10.25"));
    }

    #[test]
    fn test_invalid_lines() {
        assert!(!is_valid_line("G1 X10 Y"));
        assert!(!is_valid_line("; just a comment"));
        assert!(!is_valid_line("N10"));
        assert!(!is_valid_line(""));
        assert!(!is_valid_line("   "));
        assert!(!is_valid_line("G X10"));
        assert!(!is_valid_line("g1 X10"));
        assert!(!is_valid_line("G1 x10"));
        assert!(!is_valid_line("G1 X--1"));
        assert!(!is_valid_line("G1 X1."));
        assert!(!is_valid_line("G1 X.5"));
        assert!(!is_valid_line("G1 X+1"));
    }

    #[test]
    fn test_head_may_carry_trailing_text() {
        // Only the prefix of the head word is checked.
        assert!(is_valid_line("G1abc X1"));
    }

    #[test]
    fn test_validate_lines_reports_first_failure() {
        assert!(validate_lines(&["G28", "M104 S200"]).is_ok());

        let err = validate_lines(&["G28", "G1 X", "bogus"]).unwrap_err();
        match err {
            BambuError::InvalidGcode(msg) => assert!(msg.starts_with("line 2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
