//! Comment stripping for definitions source text.
//!
//! The scanner is a three-state machine driven one character (plus one
//! character of lookahead) at a time:
//!
//! | state          | input | next state     |
//! |----------------|-------|----------------|
//! | `Normal`       | `//`  | `LineComment`  |
//! | `Normal`       | `/*`  | `BlockComment` |
//! | `BlockComment` | `*/`  | `Normal`       |
//! | `LineComment`  | EOL   | `Normal`       |
//!
//! Comment text is replaced with spaces rather than removed, so every column
//! in a [`CleanLine`] matches the column in the original file. Block comment
//! state carries across lines; a block comment still open at end of file
//! simply ends there.
//!
//! Markers inside string literals are not special (the language has none).
//!
//! # Examples
//!
//! ```
//! use parsaur::scanner::strip_comments;
//!
//! let lines = strip_comments("CREATE TAG A; // note\n/* CREATE TAG B; */ CREATE TAG C;");
//! assert_eq!(lines[0].text.trim_end(), "CREATE TAG A;");
//! assert_eq!(lines[1].text.trim(), "CREATE TAG C;");
//! ```

/// Scanner state between characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Normal,
    LineComment,
    BlockComment,
}

/// One physical line with comments blanked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanLine {
    /// 1-indexed line number
    pub number: u32,
    pub text: String,
}

/// Outcome of feeding one character (with lookahead) to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Step {
    next: ScanState,
    /// Characters consumed (2 for a marker, 1 otherwise)
    width: usize,
    /// Whether the consumed characters are source text (kept) or comment (blanked)
    keep: bool,
}

fn step(state: ScanState, c: char, lookahead: Option<char>) -> Step {
    match (state, c, lookahead) {
        (ScanState::Normal, '/', Some('/')) => Step {
            next: ScanState::LineComment,
            width: 2,
            keep: false,
        },
        (ScanState::Normal, '/', Some('*')) => Step {
            next: ScanState::BlockComment,
            width: 2,
            keep: false,
        },
        (ScanState::Normal, _, _) => Step {
            next: ScanState::Normal,
            width: 1,
            keep: true,
        },
        (ScanState::BlockComment, '*', Some('/')) => Step {
            next: ScanState::Normal,
            width: 2,
            keep: false,
        },
        (ScanState::BlockComment, _, _) | (ScanState::LineComment, _, _) => Step {
            next: state,
            width: 1,
            keep: false,
        },
    }
}

/// Line-at-a-time comment stripper.
#[derive(Debug, Default)]
pub struct Scanner {
    state: ScanState,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state (after the last processed line).
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Strip comments from one physical line (without its line terminator).
    pub fn strip_line(&mut self, line: &str) -> String {
        let chars: Vec<char> = line.chars().collect();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;

        while i < chars.len() {
            let s = step(self.state, chars[i], chars.get(i + 1).copied());
            for c in &chars[i..i + s.width] {
                out.push(if s.keep { *c } else { ' ' });
            }
            self.state = s.next;
            i += s.width;
        }

        // A line comment never outlives its line
        if self.state == ScanState::LineComment {
            self.state = ScanState::Normal;
        }

        out
    }
}

/// Strip all comments from a file, returning its lines in order.
pub fn strip_comments(source: &str) -> Vec<CleanLine> {
    let mut scanner = Scanner::new();
    source
        .lines()
        .enumerate()
        .map(|(ix, line)| CleanLine {
            number: ix as u32 + 1,
            text: scanner.strip_line(line),
        })
        .collect()
}
