//! Re-encodes VT100-flavoured output for the browser's rendering model.
//!
//! Everything above the transport layer writes text the way a telnet
//! client expects it: SGR colour codes, `CR ESC[K` to clear the line,
//! `ESC[nD` to move the cursor, `BS SP BS` to erase a character. The
//! browser client renders styled HTML instead, so the push adapter turns
//! each write into [`PushOutbound`] frames.
//!
//! The current style persists across writes, like a terminal's would.
//! Escape sequences are parsed within a single write; one cut off at the
//! end of a write is dropped.

use lineforge_protocol::{Color, PushOutbound, Span, Style};

/// Stateful ANSI → [`PushOutbound`] converter, one per connection.
#[derive(Debug, Default)]
pub struct AnsiRenderer {
    style: Style,
}

/// Frames being assembled for one write.
#[derive(Default)]
struct Frames {
    frames: Vec<PushOutbound>,
    spans: Vec<Span>,
    run: String,
}

impl Frames {
    fn flush_run(&mut self, style: Style) {
        if !self.run.is_empty() {
            self.spans.push(Span {
                text: std::mem::take(&mut self.run),
                style,
            });
        }
    }

    fn flush_output(&mut self, style: Style) {
        self.flush_run(style);
        if !self.spans.is_empty() {
            self.frames.push(PushOutbound::Output {
                spans: std::mem::take(&mut self.spans),
            });
        }
    }

    fn push_op(&mut self, style: Style, frame: PushOutbound) {
        self.flush_output(style);
        if let (PushOutbound::Backspace { count: more }, Some(PushOutbound::Backspace { count })) =
            (&frame, self.frames.last_mut())
        {
            *count += more;
            return;
        }
        self.frames.push(frame);
    }
}

impl AnsiRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The style that will apply to the next rendered character.
    pub fn style(&self) -> Style {
        self.style
    }

    /// Converts one write into frames.
    pub fn render(&mut self, text: &str) -> Vec<PushOutbound> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = Frames::default();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            i += 1;
            match c {
                '\x1b' => {
                    if chars.get(i) != Some(&'[') {
                        continue;
                    }
                    i += 1;
                    let start = i;
                    while i < chars.len() && !('\x40'..='\x7e').contains(&chars[i]) {
                        i += 1;
                    }
                    let Some(&fin) = chars.get(i) else {
                        break;
                    };
                    let params: String = chars[start..i].iter().collect();
                    i += 1;
                    self.csi(&params, fin, &mut out);
                }
                '\r' => {
                    if chars.get(i) == Some(&'\n') {
                        i += 1;
                        out.run.push('\n');
                    } else if chars.get(i..i + 3) != Some(&['\x1b', '[', 'K'][..]) {
                        // A bare CR rewrites the line; ESC[K emits the erase
                        // itself.
                        out.push_op(self.style, PushOutbound::EraseLine);
                    }
                }
                '\x08' => {
                    if chars.get(i) == Some(&' ') && chars.get(i + 1) == Some(&'\x08') {
                        i += 2;
                        out.push_op(self.style, PushOutbound::Backspace { count: 1 });
                    } else {
                        out.push_op(self.style, PushOutbound::Cursor { delta: -1 });
                    }
                }
                '\n' | '\t' => out.run.push(c),
                c if c.is_control() => {}
                c => out.run.push(c),
            }
        }

        out.flush_output(self.style);
        out.frames
    }

    fn csi(&mut self, params: &str, fin: char, out: &mut Frames) {
        match fin {
            'm' => {
                out.flush_run(self.style);
                self.apply_sgr(params);
            }
            'K' => out.push_op(self.style, PushOutbound::EraseLine),
            'C' | 'D' => {
                let n: i32 = if params.is_empty() {
                    1
                } else {
                    match params.parse() {
                        Ok(n) => n,
                        Err(_) => return,
                    }
                };
                let delta = if fin == 'D' { -n } else { n };
                out.push_op(self.style, PushOutbound::Cursor { delta });
            }
            _ => {}
        }
    }

    fn apply_sgr(&mut self, params: &str) {
        if params.is_empty() {
            self.style = Style::default();
            return;
        }
        let codes: Vec<u16> = params.split(';').filter_map(|p| p.parse().ok()).collect();
        let mut iter = codes.into_iter();
        while let Some(code) = iter.next() {
            match code {
                0 => self.style = Style::default(),
                1 => self.style.bold = true,
                4 => self.style.underline = true,
                22 => self.style.bold = false,
                24 => self.style.underline = false,
                30..=37 => self.style.fg = Color::from_ansi((code - 30) as u8, false),
                39 => self.style.fg = None,
                40..=47 => self.style.bg = Color::from_ansi((code - 40) as u8, false),
                49 => self.style.bg = None,
                90..=97 => self.style.fg = Color::from_ansi((code - 90) as u8, true),
                100..=107 => self.style.bg = Color::from_ansi((code - 100) as u8, true),
                // 256-colour and truecolour forms: skip their arguments.
                38 | 48 => match iter.next() {
                    Some(5) => {
                        iter.next();
                    }
                    Some(2) => {
                        iter.nth(2);
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }
}
