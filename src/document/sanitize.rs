/// Strips NUL bytes and non-printable control characters (everything in
/// `\x01-\x08, \x0B, \x0C, \x0E-\x1F`) while keeping tab, newline and
/// carriage return, and re-encodes through `String` so the result is always
/// valid UTF-8. Every persisted text field is passed through this before
/// storage (SPEC_FULL.md §4.F, tested by the NUL/control-char invariant in §8).
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|&c| {
            if c == '\t' || c == '\n' || c == '\r' {
                return true;
            }
            let code = c as u32;
            if code == 0 {
                return false;
            }
            !matches!(code, 0x01..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nul_and_controls() {
        let input = "hello\0world\x01\x02\tkeep\nthis\r\n";
        let out = sanitize_text(input);
        assert_eq!(out, "helloworld\tkeep\nthis\r\n");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let input = "The deadline is December 15th.";
        assert_eq!(sanitize_text(input), input);
    }
}
