//! Push-transport frame types.
//!
//! Inbound frames come from the browser client and describe input at one
//! of three granularities: a whole line, a single keypress, or a named
//! special key. Outbound frames describe what the browser should render.
//! Styling travels as structured [`Span`]s instead of ANSI escape codes,
//! because the browser renders HTML, not a VT100 screen.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A frame sent by the browser client.
///
/// Serialized with an internal `type` tag:
/// `{"type":"line","text":"look"}`, `{"type":"key","key":"a"}`,
/// `{"type":"special","key":"up"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushInbound {
    /// A complete line typed into the client's input box.
    Line { text: String },

    /// A single keypress. `key` holds the character(s) the key produced;
    /// control characters are allowed and are canonicalized the same way
    /// raw telnet bytes are.
    Key { key: String },

    /// A named non-printing key.
    Special { key: SpecialKey },
}

/// Named keys a browser client can report without sending escape codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialKey {
    Up,
    Down,
    Left,
    Right,
    ShiftUp,
    ShiftDown,
    ShiftLeft,
    ShiftRight,
    Backspace,
    Enter,
    KillLine,
    Interrupt,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A frame sent to the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushOutbound {
    /// Styled text to append at the cursor. May contain `\r\n`.
    Output { spans: Vec<Span> },

    /// Return to the start of the current line and clear it.
    EraseLine,

    /// Move the cursor horizontally; negative is left.
    Cursor { delta: i32 },

    /// Erase `count` characters before the cursor.
    Backspace { count: u32 },

    /// Switch the client's input into (or out of) password mode.
    Mask { enabled: bool },
}

/// A run of text sharing one [`Style`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    #[serde(flatten)]
    pub style: Style,
}

/// Visual attributes of a [`Span`].
///
/// `Style::default()` is plain text: no colours, no emphasis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Style {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fg: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg: Option<Color>,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub underline: bool,
}

/// The sixteen ANSI colours, named the way CSS classes on the client are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

impl Color {
    /// Maps an ANSI colour index (0–7) plus brightness to a `Color`.
    /// Returns `None` for indices outside 0–7.
    pub fn from_ansi(index: u8, bright: bool) -> Option<Self> {
        use Color::*;
        let normal = [Black, Red, Green, Yellow, Blue, Magenta, Cyan, White];
        let vivid = [
            BrightBlack,
            BrightRed,
            BrightGreen,
            BrightYellow,
            BrightBlue,
            BrightMagenta,
            BrightCyan,
            BrightWhite,
        ];
        let table = if bright { vivid } else { normal };
        table.get(index as usize).copied()
    }
}

impl Span {
    /// Creates an unstyled span.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: Style::default(),
        }
    }
}
