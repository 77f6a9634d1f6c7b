use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // CSI sequences: colors, cursor movement, mode set/reset.
    static ref CSI: Regex = Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap();
    // OSC sequences (terminal title etc.), BEL- or ST-terminated.
    static ref OSC: Regex = Regex::new(r"\x1b\][^\x07\x1b]*(\x07|\x1b\\)?").unwrap();
    // Remaining two-byte escapes (charset selection, keypad modes).
    static ref ESC_OTHER: Regex = Regex::new(r"\x1b[@-_=><]").unwrap();
}

/// Strip terminal control sequences and control bytes from raw output,
/// keeping newlines and tabs. Carriage returns are dropped so overwritten
/// progress lines collapse into their final form.
pub fn strip_control_sequences(raw: &str) -> String {
    let s = CSI.replace_all(raw, "");
    let s = OSC.replace_all(&s, "");
    let s = ESC_OTHER.replace_all(&s, "");
    s.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_and_cursor_sequences() {
        let raw = "\x1b[1;32mgreen\x1b[0m and \x1b[2Kplain";
        assert_eq!(strip_control_sequences(raw), "green and plain");
    }

    #[test]
    fn strips_osc_title_sequences() {
        let raw = "\x1b]0;my title\x07before\x1b]2;other\x1b\\after";
        assert_eq!(strip_control_sequences(raw), "beforeafter");
    }

    #[test]
    fn drops_carriage_returns_keeps_newlines() {
        let raw = "line one\r\nline two\rline three";
        assert_eq!(strip_control_sequences(raw), "line one\nline twoline three");
    }

    #[test]
    fn strips_mode_setting_sequences() {
        let raw = "\x1b[?25lhidden cursor\x1b[?25h";
        assert_eq!(strip_control_sequences(raw), "hidden cursor");
    }
}
