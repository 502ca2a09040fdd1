//! The line discipline: turns canonical keys into edited, submitted lines.
//!
//! [`handle`] processes exactly one key. The checks run in a fixed order
//! and the first one that applies wins:
//!
//! 1. input block (everything but [`Key::Interrupt`] is discarded)
//! 2. modal routing
//! 3. movement mode (silent editing, lines are queued)
//! 4. line kill
//! 5. backspace
//! 6. line terminator
//! 7. history navigation
//! 8. cursor movement
//! 9. printable insertion
//!
//! Any edit that is not at the tail of the line goes through [`redraw`].

use lineforge_transport::Key;

use crate::Session;

/// Erases the character left of the cursor on a VT100.
const ERASE: &str = "\x08 \x08";

/// Returns to column 0 and clears the line.
const CLEAR_LINE: &str = "\r\x1b[K";

// ---------------------------------------------------------------------------
// LineBuffer
// ---------------------------------------------------------------------------

/// The not-yet-submitted line and the cursor within it.
///
/// The cursor is a character index with `0 <= cursor <= len`; every
/// mutation clamps it, so no sequence of calls can break that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBuffer {
    chars: Vec<char>,
    cursor: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer contents.
    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor == self.chars.len()
    }

    /// Characters between the cursor and the end.
    pub fn tail_len(&self) -> usize {
        self.chars.len() - self.cursor
    }

    /// Inserts `c` at the cursor and advances past it.
    pub fn insert(&mut self, c: char) {
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
    }

    /// Deletes the character before the cursor.
    pub fn remove_before_cursor(&mut self) -> Option<char> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(self.chars.remove(self.cursor))
    }

    /// Moves the cursor by up to `delta` columns and returns how far it
    /// actually moved.
    pub fn move_by(&mut self, delta: isize) -> isize {
        let target = self
            .cursor
            .saturating_add_signed(delta)
            .min(self.chars.len());
        self.move_to(target)
    }

    /// Moves the cursor to `pos` (clamped) and returns the delta.
    pub fn move_to(&mut self, pos: usize) -> isize {
        let pos = pos.min(self.chars.len());
        let delta = pos as isize - self.cursor as isize;
        self.cursor = pos;
        delta
    }

    /// Replaces the contents, leaving the cursor at the end.
    pub fn replace(&mut self, text: &str) {
        self.chars = text.chars().collect();
        self.cursor = self.chars.len();
    }

    /// Returns the contents and leaves the buffer empty.
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.chars).into_iter().collect()
    }

    pub fn clear(&mut self) {
        self.chars.clear();
        self.cursor = 0;
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Source of a user's previously submitted commands.
pub trait CommandHistory {
    /// Commands submitted by `username`, most recent first.
    fn entries(&self, username: &str) -> Vec<String>;
}

/// A history that is always empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl CommandHistory for NoHistory {
    fn entries(&self, _username: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Where a session is in its history walk.
#[derive(Debug, Clone, Default)]
pub(crate) struct HistoryCursor {
    /// Index into the most-recent-first list; `None` means "not walking".
    index: Option<usize>,
    /// The line as it was before the first step up.
    saved: Option<LineBuffer>,
}

impl HistoryCursor {
    fn reset(&mut self) {
        self.index = None;
        self.saved = None;
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What handling one key produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The key edited the line or moved the cursor.
    Handled,
    /// The key was dropped by the input block.
    Discarded,
    /// The session is modal; the key belongs to the modal handler.
    Modal(Key),
    /// A line was submitted.
    Line(String),
    /// A line was typed during movement mode and joined the queue.
    Queued(String),
    /// The emergency key was pressed.
    Interrupt,
    /// The key had no effect.
    Ignored,
}

// ---------------------------------------------------------------------------
// handle
// ---------------------------------------------------------------------------

/// Applies one key to `session`.
///
/// Echo and redraw output goes through [`Session::write`]. The function
/// always leaves the session consistent and redrawable.
pub fn handle(session: &mut Session, key: Key, history: &dyn CommandHistory) -> Outcome {
    if session.is_input_blocked() && session.is_authenticated() && key != Key::Interrupt {
        return Outcome::Discarded;
    }

    if session.state().is_modal() {
        return Outcome::Modal(key);
    }

    if session.flags().movement_mode {
        return handle_movement(session, key);
    }

    match key {
        Key::KillLine => kill_line(session),
        Key::Backspace => backspace(session),
        Key::CarriageReturn | Key::LineFeed => submit(session),
        Key::Up => history_up(session, history, false),
        Key::ShiftUp => history_up(session, history, true),
        Key::Down => history_down(session, history, false),
        Key::ShiftDown => history_down(session, history, true),
        Key::Left => move_cursor(session, |line| line.move_by(-1)),
        Key::Right => move_cursor(session, |line| line.move_by(1)),
        Key::ShiftLeft => move_cursor(session, |line| line.move_to(0)),
        Key::ShiftRight => move_cursor(session, |line| {
            let end = line.len();
            line.move_to(end)
        }),
        Key::Interrupt => Outcome::Interrupt,
        Key::Char(c) => insert(session, c),
        Key::Control(_) => Outcome::Ignored,
    }
}

fn sync_typing(session: &mut Session) {
    session.typing = !session.line.is_empty();
}

fn handle_movement(session: &mut Session, key: Key) -> Outcome {
    match key {
        Key::Char(c) => {
            session.line.insert(c);
            sync_typing(session);
            Outcome::Handled
        }
        Key::Backspace => {
            if session.line.remove_before_cursor().is_none() {
                return Outcome::Ignored;
            }
            sync_typing(session);
            Outcome::Handled
        }
        Key::CarriageReturn | Key::LineFeed => {
            if session.line.is_empty() {
                return Outcome::Ignored;
            }
            let line = session.line.take();
            sync_typing(session);
            session.queue_command(line.clone());
            Outcome::Queued(line)
        }
        Key::Interrupt => Outcome::Interrupt,
        _ => Outcome::Ignored,
    }
}

fn kill_line(session: &mut Session) -> Outcome {
    if session.line.is_empty() {
        return Outcome::Ignored;
    }
    let mut out = session
        .connection()
        .cursor_sequence(session.line.tail_len() as isize);
    out.push_str(&ERASE.repeat(session.line.len()));
    session.line.clear();
    sync_typing(session);
    session.write(&out);
    Outcome::Handled
}

fn backspace(session: &mut Session) -> Outcome {
    let at_end = session.line.is_at_end();
    if session.line.remove_before_cursor().is_none() {
        return Outcome::Ignored;
    }
    sync_typing(session);
    if at_end {
        session.write(ERASE);
    } else {
        redraw(session);
    }
    Outcome::Handled
}

fn submit(session: &mut Session) -> Outcome {
    session.write("\r\n");
    let line = session.line.take();
    sync_typing(session);
    session.history.reset();
    Outcome::Line(line)
}

fn history_up(session: &mut Session, history: &dyn CommandHistory, oldest: bool) -> Outcome {
    let Some(user) = session.user() else {
        return Outcome::Ignored;
    };
    let entries = history.entries(user);
    if entries.is_empty() {
        return Outcome::Ignored;
    }

    let last = entries.len() - 1;
    let next = match session.history.index {
        _ if oldest => last,
        None => 0,
        Some(i) if i < last => i + 1,
        Some(_) => return Outcome::Ignored,
    };
    if session.history.index == Some(next) {
        return Outcome::Ignored;
    }

    if session.history.index.is_none() {
        session.history.saved = Some(session.line.clone());
    }
    session.history.index = Some(next);
    session.line.replace(&entries[next]);
    sync_typing(session);
    redraw(session);
    Outcome::Handled
}

fn history_down(session: &mut Session, history: &dyn CommandHistory, newest: bool) -> Outcome {
    let Some(index) = session.history.index else {
        return Outcome::Ignored;
    };

    if index == 0 || newest {
        session.line = session.history.saved.take().unwrap_or_default();
        session.history.reset();
    } else {
        let entries = session
            .user()
            .map(|user| history.entries(user))
            .unwrap_or_default();
        match entries.get(index - 1) {
            Some(entry) => {
                session.line.replace(entry);
                session.history.index = Some(index - 1);
            }
            // History shrank underneath us; fall back to the saved line.
            None => {
                session.line = session.history.saved.take().unwrap_or_default();
                session.history.reset();
            }
        }
    }
    sync_typing(session);
    redraw(session);
    Outcome::Handled
}

fn move_cursor(session: &mut Session, step: impl FnOnce(&mut LineBuffer) -> isize) -> Outcome {
    let delta = step(&mut session.line);
    if delta == 0 {
        return Outcome::Ignored;
    }
    let seq = session.connection().cursor_sequence(delta);
    session.write(&seq);
    Outcome::Handled
}

fn insert(session: &mut Session, c: char) -> Outcome {
    let at_end = session.line.is_at_end();
    session.line.insert(c);
    sync_typing(session);
    if at_end {
        if session.flags().masked {
            session.write("*");
        } else {
            let mut buf = [0u8; 4];
            session.write(c.encode_utf8(&mut buf));
        }
    } else {
        redraw(session);
    }
    Outcome::Handled
}

// ---------------------------------------------------------------------------
// Redraw
// ---------------------------------------------------------------------------

/// The output that repaints the prompt and the line, leaving the remote
/// cursor where the buffer's cursor is.
pub fn redraw_sequence(session: &Session) -> String {
    let line = session.line();
    let mut out = String::from(CLEAR_LINE);
    out.push_str(session.prompt());
    if session.flags().masked {
        out.push_str(&"*".repeat(line.len()));
    } else {
        out.push_str(&line.text());
    }
    out.push_str(
        &session
            .connection()
            .cursor_sequence(-(line.tail_len() as isize)),
    );
    out
}

/// Repaints the prompt and the line.
pub fn redraw(session: &mut Session) {
    let out = redraw_sequence(session);
    session.write(&out);
}
