//! Main-content extraction and bounded chunk splitting for fetched HTML.

use crate::chunk::{Chunk, SourceSpan};
use scraper::{ElementRef, Html, Selector};
use std::collections::VecDeque;
use std::ops::Range;

/// Turns an HTML document into comparable chunks.
pub trait Segmenter: Send + Sync {
    /// Extracts the readable part of `html` as markdown, or `None` if there is nothing.
    fn extract_main_content(&self, html: &str) -> Option<String>;

    /// Splits markdown into pieces of at most `max` characters. Every piece except the last
    /// holds at least `min` characters once markup is stripped.
    fn split_into_chunks(&self, markdown: &str, min: usize, max: usize) -> Vec<String>;

    /// Extraction plus splitting, yielding chunks with ids `c0`, `c1`, ... and plain text.
    fn segment(&self, html: &str, url: Option<&str>, min: usize, max: usize) -> Vec<Chunk> {
        match self.extract_main_content(html) {
            Some(markdown) => self.chunk_markdown(&markdown, url, min, max),
            None => Vec::new(),
        }
    }

    /// Splits already extracted markdown into chunks. Source spans are byte offsets into
    /// `markdown`.
    fn chunk_markdown(&self, markdown: &str, url: Option<&str>, min: usize, max: usize) -> Vec<Chunk> {
        let mut cursor = 0;
        let mut chunks = Vec::new();
        for piece in self.split_into_chunks(markdown, min, max) {
            let plain = markdown_to_plain(&piece);
            if plain.is_empty() {
                continue;
            }
            let mut chunk = Chunk::new(format!("c{}", chunks.len()), plain);
            if let Some(offset) = markdown[cursor..].find(piece.as_str()) {
                let start = cursor + offset;
                cursor = start + piece.len();
                chunk = chunk.with_source_span(SourceSpan {
                    url: url.map(str::to_string),
                    start,
                    end: cursor,
                });
            }
            chunks.push(chunk);
        }
        chunks
    }
}

/// scraper-backed segmenter: picks `article`, `main` or `body` and renders its blocks as
/// markdown.
#[derive(Clone)]
pub struct HtmlSegmenter {
    selectors: RootSelectors,
}

impl Default for HtmlSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlSegmenter {
    /// Builds a segmenter.
    pub fn new() -> Self {
        Self {
            selectors: RootSelectors::new(),
        }
    }
}

impl Segmenter for HtmlSegmenter {
    fn extract_main_content(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let root = self.selectors.pick_root(&document);
        let mut collector = BlockCollector::default();
        collector.walk(root);
        let markdown = collector.finish();
        tracing::trace!(chars = markdown.len(), "extracted main content");
        (!markdown.is_empty()).then_some(markdown)
    }

    fn split_into_chunks(&self, markdown: &str, min: usize, max: usize) -> Vec<String> {
        pack(markdown, min, max)
            .into_iter()
            .map(|range| markdown[range].to_string())
            .collect()
    }
}

#[derive(Clone)]
struct RootSelectors {
    article: Selector,
    main: Selector,
    body: Selector,
}

impl RootSelectors {
    fn new() -> Self {
        Self {
            article: Selector::parse("article").expect("article selector"),
            main: Selector::parse("main").expect("main selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    fn pick_root<'a>(&self, document: &'a Html) -> ElementRef<'a> {
        document
            .select(&self.article)
            .next()
            .or_else(|| document.select(&self.main).next())
            .or_else(|| document.select(&self.body).next())
            .unwrap_or_else(|| document.root_element())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Heading(u8),
    Paragraph,
    ListItem,
    Quote,
    Preformatted,
}

impl BlockKind {
    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "h1" => Self::Heading(1),
            "h2" => Self::Heading(2),
            "h3" => Self::Heading(3),
            "h4" => Self::Heading(4),
            "h5" => Self::Heading(5),
            "h6" => Self::Heading(6),
            "p" => Self::Paragraph,
            "li" => Self::ListItem,
            "blockquote" => Self::Quote,
            "pre" | "code" => Self::Preformatted,
            _ => return None,
        })
    }

    fn render(self, text: &str) -> String {
        match self {
            Self::Heading(level) => format!("{} {text}", "#".repeat(usize::from(level))),
            Self::Paragraph => text.to_string(),
            Self::ListItem => format!("- {text}"),
            Self::Quote => format!("> {text}"),
            Self::Preformatted => format!("```\n{text}\n```"),
        }
    }
}

fn is_skipped(tag: &str) -> bool {
    matches!(
        tag,
        "script" | "style" | "template" | "noscript" | "svg" | "nav" | "header" | "footer" | "aside"
    )
}

#[derive(Default)]
struct BlockCollector {
    markdown: String,
}

impl BlockCollector {
    fn walk(&mut self, root: ElementRef<'_>) {
        for element in root.descendent_elements() {
            self.maybe_record(root, element);
        }
    }

    fn maybe_record(&mut self, root: ElementRef<'_>, element: ElementRef<'_>) {
        let tag = element.value().name();
        if is_skipped(tag) {
            return;
        }
        let Some(kind) = BlockKind::from_tag(tag) else {
            return;
        };
        // Blocks nested in a skipped container or in another block are covered elsewhere.
        let covered = element
            .ancestors()
            .take_while(|node| node.id() != root.id())
            .filter_map(ElementRef::wrap)
            .any(|ancestor| {
                let name = ancestor.value().name();
                is_skipped(name) || BlockKind::from_tag(name).is_some()
            });
        if covered {
            return;
        }

        let raw: String = element.text().collect();
        let text = if kind == BlockKind::Preformatted {
            collapse_newlines(&raw)
        } else {
            collapse_whitespace(&raw)
        };
        if text.is_empty() {
            return;
        }
        if !self.markdown.is_empty() {
            self.markdown.push_str("\n\n");
        }
        self.markdown.push_str(&kind.render(&text));
    }

    fn finish(self) -> String {
        self.markdown
    }
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

fn collapse_newlines(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Paragraph,
    Sentence,
    Word,
    Char,
}

impl Level {
    fn finer(self) -> Option<Self> {
        match self {
            Self::Paragraph => Some(Self::Sentence),
            Self::Sentence => Some(Self::Word),
            Self::Word => Some(Self::Char),
            Self::Char => None,
        }
    }
}

/// Cuts `range` into contiguous pieces at `level` boundaries. Separators stay with the
/// preceding piece.
fn pieces(text: &str, range: Range<usize>, level: Level) -> Vec<Range<usize>> {
    let slice = &text[range.clone()];
    let mut cuts = Vec::new();
    match level {
        Level::Paragraph => {
            let mut newlines = 0;
            for (idx, ch) in slice.char_indices() {
                if ch == '\n' {
                    newlines += 1;
                } else if !ch.is_whitespace() {
                    if newlines >= 2 && idx > 0 {
                        cuts.push(idx);
                    }
                    newlines = 0;
                }
            }
        }
        Level::Sentence => {
            let (mut after_terminal, mut saw_space) = (false, false);
            for (idx, ch) in slice.char_indices() {
                if ch.is_whitespace() {
                    saw_space |= after_terminal;
                } else {
                    if after_terminal && saw_space {
                        cuts.push(idx);
                    }
                    after_terminal = matches!(ch, '.' | '!' | '?');
                    saw_space = false;
                }
            }
        }
        Level::Word => {
            let mut prev_space = false;
            for (idx, ch) in slice.char_indices() {
                if !ch.is_whitespace() && prev_space {
                    cuts.push(idx);
                }
                prev_space = ch.is_whitespace();
            }
        }
        Level::Char => cuts.extend(slice.char_indices().map(|(idx, _)| idx).skip(1)),
    }

    let mut out = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        out.push(range.start + start..range.start + cut);
        start = cut;
    }
    out.push(range.start + start..range.end);
    out
}

fn trimmed(text: &str, range: &Range<usize>) -> Range<usize> {
    let slice = &text[range.clone()];
    let start = range.start + (slice.len() - slice.trim_start().len());
    let end = range.start + slice.trim_end().len();
    start..end.max(start)
}

fn char_len(text: &str, range: &Range<usize>) -> usize {
    text[trimmed(text, range)].chars().count()
}

/// Length of the text a chunk built from `range` will carry.
fn plain_len(text: &str, range: &Range<usize>) -> usize {
    markdown_to_plain(&text[trimmed(text, range)]).chars().count()
}

/// Greedy packing of paragraphs, then sentences, then words, then chars.
///
/// `max` bounds the markdown of a chunk and `min` bounds its plain text, so a chunk stays long
/// enough after markup is stripped. A piece that does not fit is refined only when the chunk
/// under construction is still below `min`, so short pieces merge forward.
fn pack(text: &str, min: usize, max: usize) -> Vec<Range<usize>> {
    let max = max.max(1);
    let min = min.min(max);
    let mut queue: VecDeque<(Range<usize>, Level)> = pieces(text, 0..text.len(), Level::Paragraph)
        .into_iter()
        .map(|range| (range, Level::Paragraph))
        .collect();
    let mut chunks = Vec::new();
    let mut current: Option<Range<usize>> = None;

    let flush = |range: Range<usize>, chunks: &mut Vec<Range<usize>>| {
        let range = trimmed(text, &range);
        if !range.is_empty() {
            chunks.push(range);
        }
    };

    while let Some((piece, level)) = queue.pop_front() {
        let candidate = match &current {
            Some(open) => open.start..piece.end,
            None => piece.clone(),
        };
        if char_len(text, &candidate) <= max {
            current = Some(candidate);
            continue;
        }
        let open_len = current.as_ref().map_or(0, |open| plain_len(text, open));
        if current.is_some() && open_len >= min {
            if let Some(open) = current.take() {
                flush(open, &mut chunks);
            }
            queue.push_front((piece, level));
            continue;
        }
        match level.finer() {
            Some(finer) => {
                for sub in pieces(text, piece, finer).into_iter().rev() {
                    queue.push_front((sub, finer));
                }
            }
            None => {
                if let Some(open) = current.take() {
                    flush(open, &mut chunks);
                }
                current = Some(piece);
            }
        }
    }
    if let Some(open) = current {
        flush(open, &mut chunks);
    }
    chunks
}

/// Strips the markdown this module emits (and common inline markup) down to plain text.
pub fn markdown_to_plain(markdown: &str) -> String {
    let mut lines = Vec::new();
    for line in markdown.lines() {
        let line = line.trim();
        if line.starts_with("```") {
            continue;
        }
        let line = line.trim_start_matches('#').trim_start();
        let line = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .or_else(|| line.strip_prefix("> "))
            .unwrap_or(line);
        lines.push(strip_inline(line));
    }
    collapse_whitespace(&lines.join(" "))
}

fn strip_inline(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' | '`' => {}
            '_' if out.ends_with(|c: char| !c.is_alphanumeric()) || out.is_empty() => {}
            '[' => {
                let label: String = chars.by_ref().take_while(|c| *c != ']').collect();
                out.push_str(&label);
                if chars.peek() == Some(&'(') {
                    for c in chars.by_ref() {
                        if c == ')' {
                            break;
                        }
                    }
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
          <body>
            <nav><p>Home | About</p></nav>
            <article>
              <header><p>Posted yesterday</p></header>
              <h1>Harbour Bridge</h1>
              <p>The bridge opened in <b>1932</b> after eight years of work.</p>
              <ul><li>Length: 1,149 m</li><li><p>Arch span: 503 m</p></li></ul>
              <blockquote><p>A marvel of engineering.</p></blockquote>
              <script>var tracking = true;</script>
              <aside>Related stories</aside>
            </article>
          </body>
        </html>
    "#;

    #[test]
    fn extracts_article_blocks_as_markdown() {
        let markdown = HtmlSegmenter::new()
            .extract_main_content(PAGE)
            .expect("content");
        assert_eq!(
            markdown,
            "# Harbour Bridge\n\nThe bridge opened in 1932 after eight years of work.\n\n\
             - Length: 1,149 m\n\n- Arch span: 503 m\n\n> A marvel of engineering."
        );
    }

    #[test]
    fn empty_document_has_no_content() {
        assert!(HtmlSegmenter::new()
            .extract_main_content("<html><body><script>x()</script></body></html>")
            .is_none());
    }

    #[test]
    fn chunks_respect_bounds() {
        let sentence = "Sydney Harbour Bridge carries rail, vehicle, bicycle and pedestrian traffic. ";
        let mut markdown = String::new();
        for idx in 0..12 {
            markdown.push_str(sentence);
            if idx % 3 == 2 {
                markdown.push_str("\n\n");
            }
        }
        let chunks = HtmlSegmenter::new().split_into_chunks(&markdown, 120, 200);
        assert!(chunks.len() > 2);
        let last = chunks.len() - 1;
        for (idx, chunk) in chunks.iter().enumerate() {
            let len = chunk.chars().count();
            assert!(len <= 200, "chunk {idx} has {len} chars");
            if idx != last {
                assert!(len >= 120, "chunk {idx} has {len} chars");
            }
        }
    }

    #[test]
    fn markup_does_not_count_towards_min() {
        let markdown = format!("**Bold** **bold** **bold** **bold** x\n\n{}", "word ".repeat(30));
        let chunks = HtmlSegmenter::new().chunk_markdown(&markdown, None, 30, 60);
        assert!(chunks.len() > 1);
        let last = chunks.len() - 1;
        for (idx, chunk) in chunks.iter().enumerate() {
            assert!(chunk.char_len() <= 60, "chunk {idx} has {} chars", chunk.char_len());
            if idx != last {
                assert!(chunk.char_len() >= 30, "chunk {idx} has {} chars", chunk.char_len());
            }
        }
        assert!(chunks[0].text().starts_with("Bold bold bold bold x word"));
    }

    #[test]
    fn oversized_word_is_cut() {
        let word = "a".repeat(25);
        let chunks = pack(&word, 5, 10);
        let lens: Vec<usize> = chunks.iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn short_paragraphs_merge_forward() {
        let markdown = "Short one.\n\nShort two.\n\nShort three.";
        let chunks = HtmlSegmenter::new().split_into_chunks(markdown, 20, 100);
        assert_eq!(chunks, vec![markdown.to_string()]);
    }

    #[test]
    fn segment_assigns_ids_and_spans() {
        let chunks = HtmlSegmenter::new().segment(PAGE, Some("https://example.com/a"), 10, 60);
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].id(), "c0");
        assert!(chunks[0].text().starts_with("Harbour Bridge"));
        let span = chunks[0].source_span().expect("span");
        assert_eq!(span.url.as_deref(), Some("https://example.com/a"));
        assert_eq!(span.start, 0);
    }

    #[test]
    fn plain_text_drops_markup() {
        assert_eq!(
            markdown_to_plain("## Title\n\n- **bold** item with [a link](https://x.y)\n\n> quoted `code`"),
            "Title bold item with a link quoted code"
        );
        assert_eq!(markdown_to_plain("snake_case stays"), "snake_case stays");
    }
}
