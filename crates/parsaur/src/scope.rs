//! Brace-scope tracking.
//!
//! A clean line is cut into [`ScopeEvent`]s in strict left-to-right order:
//! statement text, `{` and `}`. A `;` ends a statement unless it sits inside
//! parentheses (argument lists may contain their own separators). Parenthesis
//! depth carries across lines.
//!
//! [`ScopeStack`] keeps one frame per open `{`. A declaration that can own
//! children marks itself *pending*; the next `{` then opens a context frame
//! for it. A `{` with nothing pending opens a plain frame that contributes no
//! name to the context path.

/// One piece of a clean line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEvent<'a> {
    /// Text between braces and terminators. `column` is the 1-indexed
    /// character column of the first character of `text`; `paren_depth` is
    /// the number of parentheses open where the statement starts.
    Statement {
        text: &'a str,
        column: u32,
        paren_depth: usize,
        terminated: bool,
    },
    Open {
        column: u32,
    },
    Close {
        column: u32,
    },
}

/// Splits lines into scope events, remembering open parentheses.
#[derive(Debug, Default)]
pub struct LineSplitter {
    paren_depth: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parentheses still open after the last line.
    pub fn paren_depth(&self) -> usize {
        self.paren_depth
    }

    pub fn split<'a>(&mut self, line: &'a str) -> Vec<ScopeEvent<'a>> {
        let mut events = Vec::new();
        let mut start_byte = 0;
        let mut start_col = 1u32;
        let mut start_depth = self.paren_depth;
        let mut col = 1u32;

        for (byte, c) in line.char_indices() {
            match c {
                '(' => self.paren_depth += 1,
                ')' => self.paren_depth = self.paren_depth.saturating_sub(1),
                '{' | '}' => {
                    push_statement(&mut events, &line[start_byte..byte], start_col, start_depth, false);
                    events.push(if c == '{' {
                        ScopeEvent::Open { column: col }
                    } else {
                        ScopeEvent::Close { column: col }
                    });
                    start_byte = byte + c.len_utf8();
                    start_col = col + 1;
                    start_depth = self.paren_depth;
                }
                ';' if self.paren_depth == 0 => {
                    push_statement(&mut events, &line[start_byte..byte], start_col, start_depth, true);
                    start_byte = byte + c.len_utf8();
                    start_col = col + 1;
                    start_depth = 0;
                }
                _ => {}
            }
            col += 1;
        }

        push_statement(&mut events, &line[start_byte..], start_col, start_depth, false);
        events
    }
}

fn push_statement<'a>(
    events: &mut Vec<ScopeEvent<'a>>,
    text: &'a str,
    column: u32,
    paren_depth: usize,
    terminated: bool,
) {
    // An empty terminated statement still matters: it cancels a pending context
    if terminated || !text.trim().is_empty() {
        events.push(ScopeEvent::Statement {
            text,
            column,
            paren_depth,
            terminated,
        });
    }
}

/// One open `{`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFrame {
    /// Declared name for context frames, `None` for plain blocks
    pub name: Option<String>,
    /// File-local index of the owning declaration
    pub key: Option<usize>,
    pub is_context: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    name: String,
    key: usize,
}

/// Stack of open scopes for a single file.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
    pending: Option<Pending>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a declaration as the owner of the next `{`.
    pub fn set_pending(&mut self, name: &str, key: usize) {
        self.pending = Some(Pending {
            name: name.to_string(),
            key,
        });
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Declaration waiting for its `{`, if any.
    pub fn pending(&self) -> Option<usize> {
        self.pending.as_ref().map(|p| p.key)
    }

    /// Handle `{`.
    pub fn open(&mut self) {
        let frame = match self.pending.take() {
            Some(p) => ScopeFrame {
                name: Some(p.name),
                key: Some(p.key),
                is_context: true,
            },
            None => ScopeFrame {
                name: None,
                key: None,
                is_context: false,
            },
        };
        self.frames.push(frame);
    }

    /// Handle `}`. Returns `None` when there is nothing to close.
    pub fn close(&mut self) -> Option<ScopeFrame> {
        self.pending = None;
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost enclosing context declaration.
    pub fn current_context(&self) -> Option<usize> {
        self.frames.iter().rev().find(|f| f.is_context).and_then(|f| f.key)
    }

    /// Keys of all open context frames, outermost first.
    pub fn open_contexts(&self) -> Vec<usize> {
        self.frames.iter().filter_map(|f| f.key).collect()
    }

    /// Names of the open context frames joined with `.`.
    pub fn context_path(&self) -> String {
        self.frames
            .iter()
            .filter_map(|f| f.name.as_deref())
            .collect::<Vec<_>>()
            .join(".")
    }
}
