//! Streams a comparison reply and reassembles its `rating` block.

use crate::llm::{CompletionClient, PromptSet};
use anyhow::{bail, Result};
use fence_parser::{BlockAssembler, BlockStream, FencedBlock};
use futures_util::{StreamExt, TryStreamExt};

const RATING_TAG: &str = "rating";

/// Stance plus one-sentence explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatedReply {
    /// -2..=2 when the first line held a number in range.
    pub rating: Option<i8>,
    /// Remaining text.
    pub explanation: String,
}

impl RatedReply {
    /// Reads "first line = rating, rest = explanation". A first line that is not a rating is
    /// kept as part of the explanation.
    pub fn from_block(block: &FencedBlock) -> Self {
        let (head, rest) = block.split_first_line();
        match head.parse::<i8>() {
            Ok(rating) if (-2..=2).contains(&rating) => Self {
                rating: Some(rating),
                explanation: rest.to_string(),
            },
            _ => Self {
                rating: None,
                explanation: block.body.trim().to_string(),
            },
        }
    }
}

fn is_rating(block: &FencedBlock) -> bool {
    block.block_type.trim().eq_ignore_ascii_case(RATING_TAG)
}

/// Asks `llm` to compare `claim` against `source`.
///
/// Reading stops at the first closed `rating` block. Without one, the whole trimmed reply is the
/// explanation. An empty reply is an error.
pub async fn explain(
    llm: &dyn CompletionClient,
    prompts: &PromptSet,
    claim: &str,
    source: &str,
) -> Result<RatedReply> {
    let prompt = prompts.render_explain(claim, source);
    let tokens = llm
        .stream_complete(&prompt, Some(&prompts.explain_system))
        .await?;

    let mut raw = String::new();
    let mut rated = None;
    {
        let tee = tokens.inspect_ok(|token| raw.push_str(token));
        let mut segments = BlockStream::new(tee);
        let mut assembler = BlockAssembler::new();
        while let Some(segment) = segments.next().await {
            if let Some(block) = assembler.push(&segment?) {
                if is_rating(&block) {
                    rated = Some(block);
                    break;
                }
            }
        }
        if rated.is_none() {
            rated = assembler.finish().filter(is_rating);
        }
    }

    if let Some(block) = rated {
        tracing::debug!(block = block.index, "rating block received");
        return Ok(RatedReply::from_block(&block));
    }
    let reply = raw.trim();
    if reply.is_empty() {
        bail!("empty comparison reply");
    }
    Ok(RatedReply {
        rating: None,
        explanation: reply.to_string(),
    })
}
