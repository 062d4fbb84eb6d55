//! Incremental extraction of triple-backtick fenced blocks from streamed text.
//!
//! LLM replies arrive a few characters at a time. [`FenceParser`] consumes them one `char`
//! at a time and yields a [`BlockSegment`] for every character that belongs to the body of a
//! fenced block, so callers can rebuild structured answers without waiting for the whole reply.
//!
//! ```
//! use fence_parser::FenceParser;
//!
//! let mut parser = FenceParser::new();
//! let body: String = "noise ```tag\nHELLO\n```\nmore noise"
//!     .chars()
//!     .flat_map(|ch| parser.push(ch))
//!     .map(|segment| segment.ch)
//!     .collect();
//! assert_eq!(body, "HELLO");
//! ```

use serde::Serialize;
use std::sync::Arc;

mod stream;

pub use stream::BlockStream;

// This enables or disables the eprintln! macro, effectively removing it from the code when the
// "debug_logs" feature is disabled.
#[cfg(feature = "debug_logs")]
#[macro_export]
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

const FENCE_LEN: u8 = 3;
const TICK: char = '`';

/// One body character of a fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSegment {
    /// Zero-based index of the block, counting cleanly closed fences.
    pub block_index: usize,
    /// Type tag written after the opening fence (empty when absent).
    pub block_type: Arc<str>,
    /// The body character.
    pub ch: char,
}

/// What to do with characters still held back when the stream ends inside a fence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingPolicy {
    /// Emit held characters as body text.
    #[default]
    Flush,
    /// Drop held characters.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    FenceOpening(u8),
    TypeTag,
    Body,
    // A newline and/or a run of backticks that may turn out to be the closing fence.
    ClosingCandidate { newline: bool, ticks: u8 },
    // Three backticks seen; the fence closes only if a newline (or the end of stream) follows.
    FenceClosing { newline: bool },
}

/// Finite-state machine that recognizes fenced blocks in a character stream.
#[derive(Debug, Clone)]
pub struct FenceParser {
    state: State,
    block_index: usize,
    tag: String,
    block_type: Arc<str>,
    policy: TrailingPolicy,
}

impl Default for FenceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceParser {
    /// Creates a parser that flushes held characters at stream end.
    pub fn new() -> Self {
        Self::with_policy(TrailingPolicy::default())
    }

    /// Creates a parser with an explicit end-of-stream policy.
    pub fn with_policy(policy: TrailingPolicy) -> Self {
        Self {
            state: State::Outside,
            block_index: 0,
            tag: String::new(),
            block_type: Arc::from(""),
            policy,
        }
    }

    /// Number of fences closed so far; also the index of the next block.
    pub fn block_index(&self) -> usize {
        self.block_index
    }

    /// True while the parser sits between an opening fence and its closing fence.
    pub fn in_block(&self) -> bool {
        matches!(
            self.state,
            State::TypeTag
                | State::Body
                | State::ClosingCandidate { .. }
                | State::FenceClosing { .. }
        )
    }

    /// Feeds one character, returning the body segments it releases.
    pub fn push(&mut self, ch: char) -> std::vec::IntoIter<BlockSegment> {
        let mut out = Vec::new();
        self.step(ch, &mut out);
        out.into_iter()
    }

    /// Feeds a whole token.
    pub fn push_str(&mut self, token: &str) -> Vec<BlockSegment> {
        let mut out = Vec::new();
        for ch in token.chars() {
            self.step(ch, &mut out);
        }
        out
    }

    /// Signals end of stream.
    ///
    /// A closing fence at the very end of the stream closes its block. An unterminated fence
    /// is not an error: held characters are flushed or dropped per the [`TrailingPolicy`] and
    /// the block index stays where it is.
    pub fn finish(&mut self) -> Vec<BlockSegment> {
        let mut out = Vec::new();
        match self.state {
            State::FenceClosing { .. } => {
                self.close_block();
                self.state = State::Outside;
            }
            State::ClosingCandidate { newline, ticks } if self.policy == TrailingPolicy::Flush => {
                self.flush_held(newline, ticks, &mut out);
            }
            _ => {}
        }
        if self.in_block() {
            debug_log!(
                "stream ended inside block {} ({:?})",
                self.block_index,
                self.policy
            );
        }
        self.state = State::Outside;
        self.tag.clear();
        out
    }

    fn step(&mut self, ch: char, out: &mut Vec<BlockSegment>) {
        let state = self.state;
        self.state = match state {
            State::Outside => self.on_outside(ch),
            State::FenceOpening(ticks) => self.on_fence_opening(ticks, ch),
            State::TypeTag => self.on_type_tag(ch),
            State::Body => self.on_body(ch, out),
            State::ClosingCandidate { newline, ticks } => {
                self.on_closing_candidate(newline, ticks, ch, out)
            }
            State::FenceClosing { newline } => self.on_fence_closing(newline, ch, out),
        };
    }

    fn on_outside(&mut self, ch: char) -> State {
        if ch == TICK {
            State::FenceOpening(1)
        } else {
            State::Outside
        }
    }

    fn on_fence_opening(&mut self, ticks: u8, ch: char) -> State {
        if ch != TICK {
            return State::Outside;
        }
        let ticks = ticks + 1;
        if ticks == FENCE_LEN {
            self.tag.clear();
            State::TypeTag
        } else {
            State::FenceOpening(ticks)
        }
    }

    fn on_type_tag(&mut self, ch: char) -> State {
        if ch == '\n' {
            self.block_type = Arc::from(self.tag.trim());
            debug_log!("block {} opened as {:?}", self.block_index, self.block_type);
            State::Body
        } else {
            self.tag.push(ch);
            State::TypeTag
        }
    }

    fn on_body(&mut self, ch: char, out: &mut Vec<BlockSegment>) -> State {
        match ch {
            '\n' => State::ClosingCandidate {
                newline: true,
                ticks: 0,
            },
            TICK => State::ClosingCandidate {
                newline: false,
                ticks: 1,
            },
            other => {
                out.push(self.segment(other));
                State::Body
            }
        }
    }

    fn on_closing_candidate(
        &mut self,
        newline: bool,
        ticks: u8,
        ch: char,
        out: &mut Vec<BlockSegment>,
    ) -> State {
        match ch {
            TICK if ticks + 1 == FENCE_LEN => State::FenceClosing { newline },
            TICK => State::ClosingCandidate {
                newline,
                ticks: ticks + 1,
            },
            '\n' => {
                self.flush_held(newline, ticks, out);
                State::ClosingCandidate {
                    newline: true,
                    ticks: 0,
                }
            }
            other => {
                self.flush_held(newline, ticks, out);
                out.push(self.segment(other));
                State::Body
            }
        }
    }

    fn on_fence_closing(&mut self, newline: bool, ch: char, out: &mut Vec<BlockSegment>) -> State {
        if ch == '\n' {
            self.close_block();
            return State::Outside;
        }
        // Inline triple backticks: everything held goes back into the body.
        self.flush_held(newline, FENCE_LEN, out);
        out.push(self.segment(ch));
        State::Body
    }

    fn close_block(&mut self) {
        debug_log!("block {} closed", self.block_index);
        self.block_index += 1;
    }

    fn flush_held(&self, newline: bool, ticks: u8, out: &mut Vec<BlockSegment>) {
        if newline {
            out.push(self.segment('\n'));
        }
        for _ in 0..ticks {
            out.push(self.segment(TICK));
        }
    }

    fn segment(&self, ch: char) -> BlockSegment {
        BlockSegment {
            block_index: self.block_index,
            block_type: Arc::clone(&self.block_type),
            ch,
        }
    }
}

/// A fenced block rebuilt from its segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FencedBlock {
    /// Block index as reported by the parser.
    pub index: usize,
    /// Type tag of the block.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Body text.
    pub body: String,
}

impl FencedBlock {
    /// Splits the body into its first line and the remainder, both trimmed.
    pub fn split_first_line(&self) -> (&str, &str) {
        let trimmed = self.body.trim_start_matches('\n');
        match trimmed.split_once('\n') {
            Some((head, rest)) => (head.trim(), rest.trim()),
            None => (trimmed.trim(), ""),
        }
    }
}

/// Folds segments into completed [`FencedBlock`]s as they arrive.
#[derive(Debug, Default)]
pub struct BlockAssembler {
    current: Option<FencedBlock>,
}

impl BlockAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a segment. Returns the previous block once a segment of a later block shows up.
    pub fn push(&mut self, segment: &BlockSegment) -> Option<FencedBlock> {
        match self.current.as_mut() {
            Some(block) if block.index == segment.block_index => {
                block.body.push(segment.ch);
                None
            }
            _ => self.current.replace(FencedBlock {
                index: segment.block_index,
                block_type: segment.block_type.to_string(),
                body: segment.ch.to_string(),
            }),
        }
    }

    /// Returns the block still being assembled, if any.
    pub fn finish(&mut self) -> Option<FencedBlock> {
        self.current.take()
    }
}

/// Parses a complete reply into its fenced blocks.
///
/// Blocks with an empty body produce no segments and therefore do not appear.
pub fn parse_blocks(text: &str, policy: TrailingPolicy) -> Vec<FencedBlock> {
    let mut parser = FenceParser::with_policy(policy);
    let mut assembler = BlockAssembler::new();
    let mut blocks = Vec::new();
    let segments = parser.push_str(text).into_iter().chain(parser.finish());
    for segment in segments {
        if let Some(done) = assembler.push(&segment) {
            blocks.push(done);
        }
    }
    blocks.extend(assembler.finish());
    blocks
}
