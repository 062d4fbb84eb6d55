//! Lazy segment stream over a token stream.

use crate::{BlockSegment, FenceParser, TrailingPolicy};
use futures_util::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Adapts a stream of text tokens into a stream of [`BlockSegment`]s.
///
/// Tokens are parsed as they arrive; nothing beyond the current token is buffered. Upstream
/// errors are passed through unchanged and do not reset the parser.
pub struct BlockStream<S> {
    inner: S,
    parser: FenceParser,
    pending: VecDeque<BlockSegment>,
    exhausted: bool,
}

impl<S> BlockStream<S> {
    /// Wraps `inner` with the default trailing policy.
    pub fn new(inner: S) -> Self {
        Self::with_policy(inner, TrailingPolicy::default())
    }

    /// Wraps `inner` with an explicit trailing policy.
    pub fn with_policy(inner: S, policy: TrailingPolicy) -> Self {
        Self {
            inner,
            parser: FenceParser::with_policy(policy),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Number of fences closed so far.
    pub fn closed_blocks(&self) -> usize {
        self.parser.block_index()
    }
}

impl<S, T, E> Stream for BlockStream<S>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    T: AsRef<str>,
{
    type Item = Result<BlockSegment, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(segment) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(segment)));
            }
            if this.exhausted {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(token))) => {
                    this.pending.extend(this.parser.push_str(token.as_ref()));
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.exhausted = true;
                    this.pending.extend(this.parser.finish());
                }
            }
        }
    }
}
