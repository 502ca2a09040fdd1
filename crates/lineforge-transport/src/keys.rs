//! Canonical keystrokes and the byte-level decoder that produces them.
//!
//! Telnet clients deliver single bytes, escape sequences split across TCP
//! reads, and whichever flavour of line ending their author preferred.
//! [`KeyDecoder`] folds all of that into one [`Key`] per keystroke:
//!
//! | bytes                       | key                         |
//! |-----------------------------|-----------------------------|
//! | `CR`, `CR LF`, `CR NUL`     | `CarriageReturn`            |
//! | `LF`                        | `LineFeed`                  |
//! | `BS` (8), `DEL` (127)       | `Backspace`                 |
//! | `ETX` (3, Ctrl-C)           | `Interrupt`                 |
//! | `NAK` (21, Ctrl-U)          | `KillLine`                  |
//! | `ESC [ A/B/C/D`             | `Up`/`Down`/`Right`/`Left`  |
//! | `ESC [ 1 ; 2 A/B/C/D`       | `Shift*` variants           |
//! | other bytes below 32        | `Control(b)`                |
//! | everything else             | `Char(c)` (UTF-8 decoded)   |
//!
//! Unrecognized CSI sequences are absorbed. An `ESC` followed by anything
//! other than `[` is dropped and the following byte is read as plain text.

/// One canonical keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// A printable character.
    Char(char),
    /// Carriage return; a following LF has already been swallowed.
    CarriageReturn,
    /// A bare line feed.
    LineFeed,
    Backspace,
    /// Erase the whole pending line (Ctrl-U).
    KillLine,
    /// The emergency character (Ctrl-C). Passes input blocks.
    Interrupt,
    Up,
    Down,
    Left,
    Right,
    ShiftUp,
    ShiftDown,
    ShiftLeft,
    ShiftRight,
    /// Any other control byte below 32.
    Control(u8),
}

impl Key {
    /// Returns `true` for `CarriageReturn` and `LineFeed`.
    pub fn is_line_terminator(&self) -> bool {
        matches!(self, Self::CarriageReturn | Self::LineFeed)
    }

    /// Returns the character for `Char`, `None` for everything else.
    pub fn as_char(&self) -> Option<char> {
        match self {
            Self::Char(c) => Some(*c),
            _ => None,
        }
    }
}

const ESC: u8 = 0x1b;
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const NUL: u8 = 0;
const BS: u8 = 8;
const DEL: u8 = 127;
const ETX: u8 = 3;
const NAK: u8 = 21;

/// Longest CSI parameter run we keep before giving up on the sequence.
const MAX_CSI_LEN: usize = 16;

#[derive(Debug, Default)]
enum State {
    #[default]
    Ground,
    /// The previous byte was CR; a following LF or NUL is swallowed.
    AfterCr,
    Escape,
    Csi(Vec<u8>),
    /// A CSI sequence too long to be one we recognise; absorbed up to its
    /// final byte.
    CsiOverflow,
}

/// Incremental bytes → [`Key`] decoder.
///
/// Keeps state between calls, so a sequence split across two reads
/// decodes the same as one delivered whole.
#[derive(Debug, Default)]
pub struct KeyDecoder {
    state: State,
    /// Bytes of a multi-byte UTF-8 character still waiting for the rest.
    utf8: Vec<u8>,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a chunk of bytes, appending the resulting keys to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<Key>) {
        for &b in chunk {
            self.byte(b, out);
        }
    }

    /// Convenience wrapper around [`feed`](Self::feed) for whole strings.
    pub fn decode_str(&mut self, text: &str) -> Vec<Key> {
        let mut out = Vec::with_capacity(text.len());
        self.feed(text.as_bytes(), &mut out);
        out
    }

    fn byte(&mut self, b: u8, out: &mut Vec<Key>) {
        match std::mem::take(&mut self.state) {
            State::Ground => self.ground(b, out),
            State::AfterCr => {
                if b != LF && b != NUL {
                    self.ground(b, out);
                }
            }
            State::Escape => {
                if b == b'[' {
                    self.state = State::Csi(Vec::new());
                } else {
                    self.ground(b, out);
                }
            }
            State::Csi(mut params) => match b {
                0x40..=0x7e => {
                    if let Some(key) = csi_key(&params, b) {
                        out.push(key);
                    }
                }
                0x20..=0x3f if params.len() < MAX_CSI_LEN => {
                    params.push(b);
                    self.state = State::Csi(params);
                }
                0x20..=0x3f => self.state = State::CsiOverflow,
                // A control byte ends the sequence but still counts as input.
                0..=0x1f | DEL => self.ground(b, out),
                // Anything else aborts the sequence without surfacing it.
                _ => {}
            },
            State::CsiOverflow => match b {
                0x40..=0x7e => {}
                0x20..=0x3f => self.state = State::CsiOverflow,
                0..=0x1f | DEL => self.ground(b, out),
                _ => {}
            },
        }
    }

    fn ground(&mut self, b: u8, out: &mut Vec<Key>) {
        if b < 0x80 && !self.utf8.is_empty() {
            // A truncated multi-byte character; surface it as U+FFFD.
            self.flush_utf8_lossy(out);
        }
        match b {
            CR => {
                out.push(Key::CarriageReturn);
                self.state = State::AfterCr;
            }
            LF => out.push(Key::LineFeed),
            BS | DEL => out.push(Key::Backspace),
            ETX => out.push(Key::Interrupt),
            NAK => out.push(Key::KillLine),
            ESC => self.state = State::Escape,
            0..=31 => out.push(Key::Control(b)),
            32..=126 => out.push(Key::Char(b as char)),
            _ => self.utf8_byte(b, out),
        }
    }

    fn utf8_byte(&mut self, b: u8, out: &mut Vec<Key>) {
        self.utf8.push(b);
        match std::str::from_utf8(&self.utf8) {
            Ok(s) => {
                out.extend(s.chars().map(Key::Char));
                self.utf8.clear();
            }
            Err(e) if e.error_len().is_some() || self.utf8.len() >= 4 => {
                self.flush_utf8_lossy(out);
            }
            Err(_) => {} // incomplete, wait for more
        }
    }

    fn flush_utf8_lossy(&mut self, out: &mut Vec<Key>) {
        let text = String::from_utf8_lossy(&self.utf8).into_owned();
        out.extend(text.chars().map(Key::Char));
        self.utf8.clear();
    }
}

fn csi_key(params: &[u8], fin: u8) -> Option<Key> {
    let key = match (params, fin) {
        (b"", b'A') => Key::Up,
        (b"", b'B') => Key::Down,
        (b"", b'C') => Key::Right,
        (b"", b'D') => Key::Left,
        (b"1;2", b'A') => Key::ShiftUp,
        (b"1;2", b'B') => Key::ShiftDown,
        (b"1;2", b'C') => Key::ShiftRight,
        (b"1;2", b'D') => Key::ShiftLeft,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Vec<Key> {
        let mut out = Vec::new();
        KeyDecoder::new().feed(bytes, &mut out);
        out
    }

    #[test]
    fn test_feed_plain_text_yields_chars() {
        assert_eq!(
            decode(b"hi"),
            vec![Key::Char('h'), Key::Char('i')]
        );
    }

    #[test]
    fn test_feed_crlf_collapses_to_one_carriage_return() {
        assert_eq!(
            decode(b"a\r\nb"),
            vec![Key::Char('a'), Key::CarriageReturn, Key::Char('b')]
        );
    }

    #[test]
    fn test_feed_cr_nul_collapses_to_one_carriage_return() {
        assert_eq!(decode(b"\r\0"), vec![Key::CarriageReturn]);
    }

    #[test]
    fn test_feed_bare_lf_is_its_own_event() {
        assert_eq!(decode(b"\n\n"), vec![Key::LineFeed, Key::LineFeed]);
    }

    #[test]
    fn test_feed_cr_cr_yields_two_events() {
        assert_eq!(
            decode(b"\r\r"),
            vec![Key::CarriageReturn, Key::CarriageReturn]
        );
    }

    #[test]
    fn test_feed_bs_and_del_both_backspace() {
        assert_eq!(decode(&[8, 127]), vec![Key::Backspace, Key::Backspace]);
    }

    #[test]
    fn test_feed_control_characters() {
        assert_eq!(
            decode(&[3, 21, 9]),
            vec![Key::Interrupt, Key::KillLine, Key::Control(9)]
        );
    }

    #[test]
    fn test_feed_arrow_sequences() {
        assert_eq!(
            decode(b"\x1b[A\x1b[B\x1b[C\x1b[D"),
            vec![Key::Up, Key::Down, Key::Right, Key::Left]
        );
    }

    #[test]
    fn test_feed_shift_arrow_sequences() {
        assert_eq!(
            decode(b"\x1b[1;2A\x1b[1;2B\x1b[1;2C\x1b[1;2D"),
            vec![Key::ShiftUp, Key::ShiftDown, Key::ShiftRight, Key::ShiftLeft]
        );
    }

    #[test]
    fn test_feed_escape_split_across_chunks() {
        let mut decoder = KeyDecoder::new();
        let mut out = Vec::new();
        decoder.feed(b"\x1b", &mut out);
        decoder.feed(b"[", &mut out);
        assert!(out.is_empty());
        decoder.feed(b"A", &mut out);
        assert_eq!(out, vec![Key::Up]);
    }

    #[test]
    fn test_feed_crlf_split_across_chunks() {
        let mut decoder = KeyDecoder::new();
        let mut out = Vec::new();
        decoder.feed(b"x\r", &mut out);
        decoder.feed(b"\ny", &mut out);
        assert_eq!(
            out,
            vec![Key::Char('x'), Key::CarriageReturn, Key::Char('y')]
        );
    }

    #[test]
    fn test_feed_overlong_csi_is_absorbed_to_final_byte() {
        assert_eq!(decode(b"\x1b[38;2;255;128;64;1m"), vec![]);
        assert_eq!(decode(b"\x1b[38;2;255;128;64;1;4;5mok"), vec![Key::Char('o'), Key::Char('k')]);
    }

    #[test]
    fn test_feed_control_byte_ends_csi_and_is_kept() {
        assert_eq!(decode(b"\x1b[\r"), vec![Key::CarriageReturn]);
        assert_eq!(decode(b"\x1b[1;\x03"), vec![Key::Interrupt]);
        assert_eq!(decode(b"\x1b[\x1b[A"), vec![Key::Up]);
    }

    #[test]
    fn test_feed_unknown_csi_is_absorbed() {
        assert_eq!(decode(b"\x1b[5~z"), vec![Key::Char('z')]);
    }

    #[test]
    fn test_feed_escape_without_bracket_degrades_to_text() {
        assert_eq!(decode(b"\x1bq"), vec![Key::Char('q')]);
    }

    #[test]
    fn test_feed_utf8_split_across_chunks() {
        let bytes = "é".as_bytes();
        let mut decoder = KeyDecoder::new();
        let mut out = Vec::new();
        decoder.feed(&bytes[..1], &mut out);
        assert!(out.is_empty());
        decoder.feed(&bytes[1..], &mut out);
        assert_eq!(out, vec![Key::Char('é')]);
    }

    #[test]
    fn test_feed_invalid_utf8_becomes_replacement_char() {
        assert_eq!(
            decode(&[0xff, b'a']),
            vec![Key::Char('\u{fffd}'), Key::Char('a')]
        );
    }

    #[test]
    fn test_feed_truncated_utf8_before_ascii_is_replaced() {
        // First byte of a 2-byte sequence, then plain ASCII.
        assert_eq!(
            decode(&[0xc3, b'a']),
            vec![Key::Char('\u{fffd}'), Key::Char('a')]
        );
    }

    #[test]
    fn test_is_line_terminator() {
        assert!(Key::CarriageReturn.is_line_terminator());
        assert!(Key::LineFeed.is_line_terminator());
        assert!(!Key::Char('\r').is_line_terminator());
    }
}
