//! Block tokenization of markdown documents.
//!
//! The engine consumes documents through the [`Tokenizer`] interface: an
//! ordered stream of block tokens carrying line maps, with heading content
//! delivered as inline children. [`BlockTokenizer`] is the built-in
//! line-scanning implementation; embedders with a richer parser can supply
//! their own.
//!
//! Only the token kinds the engine cares about are emitted: headings (for
//! outlines) and code/HTML regions (for link-scan exclusion). Paragraph
//! text is scanned separately by the link computer.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    HeadingOpen,
    HeadingClose,
    Inline,
    Fence,
    CodeBlock,
    HtmlBlock,
    Frontmatter,
    Text,
    CodeInline,
    Emoji,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// The marker that produced the token: `#`-run, `=`, `-`, or fence chars.
    pub markup: String,
    /// `[start_line, end_line_exclusive]` for block tokens, 0-based.
    pub map: Option<[usize; 2]>,
    pub children: Vec<Token>,
    pub content: String,
}

impl Token {
    fn block(kind: TokenKind, markup: &str, map: [usize; 2]) -> Token {
        Token {
            kind,
            markup: markup.to_string(),
            map: Some(map),
            children: Vec::new(),
            content: String::new(),
        }
    }

    fn inline_child(kind: TokenKind, content: &str) -> Token {
        Token {
            kind,
            markup: String::new(),
            map: None,
            children: Vec::new(),
            content: content.to_string(),
        }
    }
}

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, doc: &Document) -> Vec<Token>;
}

static ATX_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(?<marker>#{1,6})(?:[ \t]+(?<text>.*))?$").unwrap());

static ATX_CLOSING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+#+[ \t]*$").unwrap());

static SETEXT_UNDERLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(?<marker>=+|-+)[ \t]*$").unwrap());

static FENCE_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(?<marker>```+|~~~+)").unwrap());

// A tag-ish start; the first word must not continue with `:` so that
// autolinks like `<https://...>` at the start of a line stay links.
static HTML_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}<(?:[!?]|/?[a-zA-Z][a-zA-Z0-9-]*(?:[\s/>]|$))").unwrap());

static LIST_OR_QUOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(?:[-*+]\s|\d{1,9}[.)]\s|>)").unwrap());

pub struct BlockTokenizer;

impl Tokenizer for BlockTokenizer {
    fn tokenize(&self, doc: &Document) -> Vec<Token> {
        let lines: Vec<&str> = doc
            .text()
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .collect();

        let mut tokens = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];

            if i == 0 && line.trim_end() == "---" {
                let end = frontmatter_end(&lines);
                if let Some(end) = end {
                    tokens.push(Token::block(TokenKind::Frontmatter, "---", [0, end]));
                    i = end;
                    continue;
                }
            }

            if let Some(caps) = FENCE_OPEN_RE.captures(line) {
                let marker = caps.name("marker").unwrap().as_str();
                let close = (i + 1..lines.len()).find(|&j| fence_closes(lines[j], marker));
                let end = close.map(|j| j + 1).unwrap_or(lines.len());
                tokens.push(Token::block(TokenKind::Fence, marker, [i, end]));
                i = end;
                continue;
            }

            if is_indented_code(line) && (i == 0 || lines[i - 1].trim().is_empty()) {
                let mut end = i + 1;
                while end < lines.len()
                    && (is_indented_code(lines[end]) || lines[end].trim().is_empty())
                {
                    end += 1;
                }
                while end > i + 1 && lines[end - 1].trim().is_empty() {
                    end -= 1;
                }
                tokens.push(Token::block(TokenKind::CodeBlock, "", [i, end]));
                i = end;
                continue;
            }

            if HTML_BLOCK_RE.is_match(line) {
                let mut end = i + 1;
                while end < lines.len() && !lines[end].trim().is_empty() {
                    end += 1;
                }
                tokens.push(Token::block(TokenKind::HtmlBlock, "", [i, end]));
                i = end;
                continue;
            }

            if let Some(caps) = ATX_HEADING_RE.captures(line) {
                let marker = caps.name("marker").unwrap().as_str();
                let raw = caps.name("text").map(|t| t.as_str()).unwrap_or("");
                let text = ATX_CLOSING_RE.replace(raw, "");
                push_heading(&mut tokens, marker, text.trim_end(), [i, i + 1], i);
                i += 1;
                continue;
            }

            if !line.trim().is_empty() && !LIST_OR_QUOTE_RE.is_match(line) {
                if let Some(next) = lines.get(i + 1) {
                    if let Some(caps) = SETEXT_UNDERLINE_RE.captures(next) {
                        let marker = &caps.name("marker").unwrap().as_str()[..1];
                        push_heading(&mut tokens, marker, line.trim(), [i, i + 2], i);
                        i += 2;
                        continue;
                    }
                }
            }

            i += 1;
        }
        tokens
    }
}

fn push_heading(tokens: &mut Vec<Token>, markup: &str, text: &str, map: [usize; 2], line: usize) {
    tokens.push(Token::block(TokenKind::HeadingOpen, markup, map));
    let mut inline = Token::block(TokenKind::Inline, "", [line, line + 1]);
    inline.content = text.to_string();
    inline.children = inline_children(text);
    tokens.push(inline);
    tokens.push(Token::block(TokenKind::HeadingClose, markup, map));
}

fn frontmatter_end(lines: &[&str]) -> Option<usize> {
    (1..lines.len())
        .find(|&j| {
            let t = lines[j].trim_end();
            t == "---" || t == "..."
        })
        .map(|j| j + 1)
}

fn fence_closes(line: &str, marker: &str) -> bool {
    let stripped = line.trim_start_matches(' ');
    if line.len() - stripped.len() > 3 {
        return false;
    }
    let fence_char = marker.as_bytes()[0];
    let run = stripped.bytes().take_while(|&b| b == fence_char).count();
    run >= marker.len() && stripped[run..].trim().is_empty()
}

fn is_indented_code(line: &str) -> bool {
    (line.starts_with("    ") || line.starts_with('\t')) && !line.trim().is_empty()
}

/// Splits heading content on inline code spans: text and code contents both
/// contribute to display text; the backticks themselves do not.
fn inline_children(text: &str) -> Vec<Token> {
    let mut children = Vec::new();
    let mut cursor = 0;
    for span in inline_code_spans(text) {
        if span.start > cursor {
            children.push(Token::inline_child(TokenKind::Text, &text[cursor..span.start]));
        }
        let ticks = text[span.start..span.end]
            .bytes()
            .take_while(|&b| b == b'`')
            .count();
        let inner = &text[span.start + ticks..span.end - ticks];
        children.push(Token::inline_child(TokenKind::CodeInline, inner));
        cursor = span.end;
    }
    if cursor < text.len() {
        children.push(Token::inline_child(TokenKind::Text, &text[cursor..]));
    }
    children
}

/// Byte ranges of inline code spans: a backtick run pairs with the next run
/// of the same length, without crossing a blank line. The `regex` crate has
/// no backreferences, so this is a hand scan.
pub(crate) fn inline_code_spans(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            let start = i;
            while i < bytes.len() && bytes[i] == b'`' {
                i += 1;
            }
            runs.push((start, i - start));
        } else {
            i += 1;
        }
    }

    let mut spans = Vec::new();
    let mut idx = 0;
    while idx < runs.len() {
        let (start, len) = runs[idx];
        let close = runs[idx + 1..]
            .iter()
            .position(|&(s, l)| l == len && !text[start..s].contains("\n\n"));
        match close {
            Some(offset) => {
                let (close_start, close_len) = runs[idx + 1 + offset];
                spans.push(start..close_start + close_len);
                idx += offset + 2;
            }
            None => idx += 1,
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Url;

    fn tokens(text: &str) -> Vec<Token> {
        let doc = Document::new(Url::parse("file:///ws/doc.md").unwrap(), 0, text);
        BlockTokenizer.tokenize(&doc)
    }

    fn headings(text: &str) -> Vec<(String, String)> {
        let toks = tokens(text);
        toks.iter()
            .enumerate()
            .filter(|(_, t)| t.kind == TokenKind::HeadingOpen)
            .map(|(i, t)| (t.markup.clone(), toks[i + 1].content.clone()))
            .collect()
    }

    /// Test: ATX headings produce open/inline/close triples with the `#` run
    /// as markup and the closing sequence stripped.
    #[test]
    fn test_atx_headings() {
        let hs = headings("# Top\n\n## Sub heading ##\n");
        assert_eq!(
            hs,
            vec![
                ("#".to_string(), "Top".to_string()),
                ("##".to_string(), "Sub heading".to_string()),
            ]
        );
    }

    /// Test: setext underlines produce `=` and `-` markup.
    #[test]
    fn test_setext_headings() {
        let hs = headings("Title\n=====\n\nSection\n-------\n");
        assert_eq!(
            hs,
            vec![
                ("=".to_string(), "Title".to_string()),
                ("-".to_string(), "Section".to_string()),
            ]
        );
    }

    /// Test: a list item followed by a `-` run is not a setext heading.
    #[test]
    fn test_list_item_not_setext() {
        assert!(headings("- item\n---\n").is_empty());
    }

    /// Test: fenced blocks span to their closing fence, or to document end
    /// when unclosed.
    #[test]
    fn test_fence_ranges() {
        let toks = tokens("```\ncode\n```\ntext\n~~~\ndangling\n");
        let fences: Vec<[usize; 2]> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::Fence)
            .map(|t| t.map.unwrap())
            .collect();
        assert_eq!(fences, vec![[0, 3], [4, 7]]);
    }

    /// Test: headings inside fences are not tokenized as headings.
    #[test]
    fn test_fence_hides_heading() {
        assert!(headings("```\n# not a heading\n```\n").is_empty());
    }

    /// Test: an autolink at the start of a line is not an HTML block.
    #[test]
    fn test_autolink_line_is_not_html_block() {
        let toks = tokens("<https://example.com>\n\n<div>\nblock\n</div>\n");
        let html: Vec<[usize; 2]> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::HtmlBlock)
            .map(|t| t.map.unwrap())
            .collect();
        assert_eq!(html, vec![[2, 5]]);
    }

    /// Test: yaml frontmatter is consumed as a single block.
    #[test]
    fn test_frontmatter_block() {
        let toks = tokens("---\ntitle: x\n---\n# Real\n");
        assert_eq!(toks[0].kind, TokenKind::Frontmatter);
        assert_eq!(toks[0].map, Some([0, 3]));
        assert_eq!(headings("---\ntitle: x\n---\n# Real\n").len(), 1);
    }

    /// Test: inline code spans pair equal-length backtick runs and do not
    /// cross blank lines.
    #[test]
    fn test_inline_code_spans() {
        let spans = inline_code_spans("a `b` c ``d ` e`` f");
        assert_eq!(spans, vec![2..5, 8..17]);

        let unpaired = inline_code_spans("a ` b\n\nc ` d");
        assert!(unpaired.is_empty());
    }

    /// Test: heading children split text and inline code, keeping code
    /// content without backticks.
    #[test]
    fn test_heading_inline_children() {
        let toks = tokens("# Has `code` span\n");
        let inline = toks.iter().find(|t| t.kind == TokenKind::Inline).unwrap();
        let parts: Vec<(TokenKind, &str)> = inline
            .children
            .iter()
            .map(|c| (c.kind, c.content.as_str()))
            .collect();
        assert_eq!(
            parts,
            vec![
                (TokenKind::Text, "Has "),
                (TokenKind::CodeInline, "code"),
                (TokenKind::Text, " span"),
            ]
        );
    }

    /// Test: indented code after a blank line is a code block; indented
    /// continuation of a paragraph is not.
    #[test]
    fn test_indented_code() {
        let toks = tokens("para\n    still para\n\n    code here\n");
        let blocks: Vec<[usize; 2]> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::CodeBlock)
            .map(|t| t.map.unwrap())
            .collect();
        assert_eq!(blocks, vec![[3, 4]]);
    }
}
