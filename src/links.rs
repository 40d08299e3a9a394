//! Link extraction and target classification.
//!
//! [`LinkComputer::get_all_links`] scans a document's text for every
//! link-like construct — inline links (including links nested inside
//! another link's text), reference-style links and bare `[ref]` shorthands,
//! autolinks, and link definitions — with byte-accurate source spans.
//! Matches inside code blocks, fences, HTML blocks, frontmatter, and inline
//! code spans are discarded.
//!
//! Every candidate target is classified into a [`Href`]: an absolute
//! external URI, an internal file-plus-fragment target resolved against the
//! source document, or a named reference to be looked up in the defining
//! document's definition set. A target that cannot be parsed drops that
//! single link; it never fails the whole pass.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tower_lsp::lsp_types::Url;

use crate::cancel::CancellationToken;
use crate::document::{Document, Span};
use crate::tokenize::{inline_code_spans, Token, TokenKind, Tokenizer};
use crate::workspace::Workspace;

/// A classified link target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Href {
    /// An absolute URI with a recognized scheme.
    External { uri: Url },
    /// A resolved target resource plus a fragment (possibly empty).
    Internal { path: Url, fragment: String },
    /// A reference name, resolved later against the document's definitions.
    Reference { name: String },
}

/// Where a link was written. All spans index the owning document's text at
/// the version the computation ran against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSource {
    /// The full match.
    pub range: Span,
    /// Destination plus optional title.
    pub target_range: Span,
    /// Raw href text, angle brackets stripped.
    pub href_text: String,
    /// Raw href text up to (excluding) the first `#`.
    pub path_text: String,
    pub href_range: Span,
    /// The fragment's own span, when a `#` is present.
    pub fragment_range: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineLink {
    pub href: Href,
    pub source: LinkSource,
}

/// A `[name]: target` definition. Its href is always External or Internal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDefinition {
    pub href: Href,
    pub name: String,
    pub name_range: Span,
    pub source: LinkSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Inline(InlineLink),
    Definition(LinkDefinition),
}

impl Link {
    pub fn href(&self) -> &Href {
        match self {
            Link::Inline(link) => &link.href,
            Link::Definition(def) => &def.href,
        }
    }

    pub fn source(&self) -> &LinkSource {
        match self {
            Link::Inline(link) => &link.source,
            Link::Definition(def) => &def.source,
        }
    }
}

/// Reference name → its last-declared definition. Names are case-sensitive
/// as written.
#[derive(Debug, Clone, Default)]
pub struct LinkDefinitionSet {
    by_name: HashMap<String, LinkDefinition>,
}

impl LinkDefinitionSet {
    pub fn new(links: &[Link]) -> LinkDefinitionSet {
        let mut by_name = HashMap::new();
        for link in links {
            if let Link::Definition(def) = link {
                by_name.insert(def.name.clone(), def.clone());
            }
        }
        LinkDefinitionSet { by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<&LinkDefinition> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkDefinition> {
        self.by_name.values()
    }
}

static INLINE_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"!?\[(?<text>(?:\[[^\[\]]*\]|[^\[\]])*)\]\(\s*(?<target>(?<dest><[^<>\n]*>|[^\s()]+(?:\([^\s()]*\)[^\s()]*)*)?(?:\s+(?<title>"[^"]*"|'[^']*'|\([^)]*\)))?)\s*\)"#,
    )
    .unwrap()
});

// No lookbehind in the regex crate: the boundary character is captured and
// the link offset is taken from the end of the prefix group.
static REFERENCE_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?<prefix>^|[^\]\\])\[(?<label>[^\[\]]+)\](?:\[(?<ref>[^\[\]]*)\])?").unwrap()
});

static AUTO_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?<dest>[a-zA-Z][a-zA-Z-]*:[^<>\s]+)>").unwrap());

static DEFINITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*\[(?<label>(?:\\\]|[^\[\]])+)\]:[ \t]*(?<dest><[^<>\n]*>|\S+)(?:[ \t]+(?<title>"[^"]*"|'[^']*'))?"#,
    )
    .unwrap()
});

static EXTERNAL_SCHEME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z-]*:").unwrap());

static CHECKBOX_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+$").unwrap());

/// Classifies a raw link target against its source document: a leading
/// `scheme:` makes it external, anything else resolves as an internal path.
/// Returns `None` for targets that cannot be represented (malformed URIs,
/// absolute paths with no workspace root).
pub fn create_href(workspace: &dyn Workspace, source: &Url, href_text: &str) -> Option<Href> {
    if href_text.is_empty() {
        return None;
    }
    if EXTERNAL_SCHEME_RE.is_match(href_text) {
        return Url::parse(href_text).ok().map(|uri| Href::External { uri });
    }
    create_internal_href(workspace, source, href_text)
}

fn create_internal_href(workspace: &dyn Workspace, source: &Url, href_text: &str) -> Option<Href> {
    let (path_part, fragment) = match href_text.find('#') {
        Some(idx) => (&href_text[..idx], &href_text[idx + 1..]),
        None => (href_text, ""),
    };
    let decoded = urlencoding::decode(path_part)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| path_part.to_string());

    let path = if decoded.is_empty() {
        // Fragment-only link: the source document itself.
        let mut own = source.clone();
        own.set_fragment(None);
        own
    } else if let Some(rooted) = decoded.strip_prefix('/') {
        let root = workspace.get_workspace_folder(source)?;
        as_directory(&root).join(rooted).ok()?
    } else {
        let base = if source.scheme() == "file" {
            source.clone()
        } else if let Some(container) = workspace.get_containing_document(source) {
            container.uri
        } else {
            as_directory(&workspace.get_workspace_folder(source)?)
        };
        base.join(&decoded).ok()?
    };

    Some(Href::Internal {
        path,
        fragment: fragment.to_string(),
    })
}

fn as_directory(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut dir = url.clone();
        dir.set_path(&format!("{}/", url.path()));
        dir
    }
}

/// Source regions in which link syntax is not recognized.
struct NoLinkRanges {
    ranges: Vec<Range<usize>>,
}

impl NoLinkRanges {
    fn compute(tokens: &[Token], doc: &Document) -> NoLinkRanges {
        let rope = doc.rope();
        let mut ranges = Vec::new();
        for token in tokens {
            let excluded = matches!(
                token.kind,
                TokenKind::Fence
                    | TokenKind::CodeBlock
                    | TokenKind::HtmlBlock
                    | TokenKind::Frontmatter
            );
            if !excluded {
                continue;
            }
            if let Some([start, end]) = token.map {
                let start_byte = rope.line_to_byte(start.min(rope.len_lines()));
                let end_byte = if end >= rope.len_lines() {
                    rope.len_bytes()
                } else {
                    rope.line_to_byte(end)
                };
                ranges.push(start_byte..end_byte);
            }
        }

        // Inline code spans are rescanned over the raw text, with block
        // regions masked out so a fence's own backticks cannot pair with a
        // code span elsewhere.
        let mut masked = doc.text().as_bytes().to_vec();
        for range in &ranges {
            for byte in &mut masked[range.clone()] {
                if *byte != b'\n' {
                    *byte = b' ';
                }
            }
        }
        if let Ok(masked) = String::from_utf8(masked) {
            ranges.extend(inline_code_spans(&masked));
        }

        NoLinkRanges { ranges }
    }

    fn contains(&self, offset: usize) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start <= offset && offset < r.end)
    }

    fn add(&mut self, range: Range<usize>) {
        self.ranges.push(range);
    }
}

fn link_source(
    doc: &Document,
    full: Range<usize>,
    target: Range<usize>,
    href: Range<usize>,
    href_text: &str,
) -> LinkSource {
    let (path_text, fragment_range) = match href_text.find('#') {
        Some(idx) => (
            href_text[..idx].to_string(),
            Some(doc.span(href.start + idx + 1..href.end)),
        ),
        None => (href_text.to_string(), None),
    };
    LinkSource {
        range: doc.span(full),
        target_range: doc.span(target),
        href_text: href_text.to_string(),
        path_text,
        href_range: doc.span(href),
        fragment_range,
    }
}

/// Stateless link extraction over one document.
pub struct LinkComputer {
    tokenizer: Arc<dyn Tokenizer>,
    workspace: Arc<dyn Workspace>,
}

impl LinkComputer {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, workspace: Arc<dyn Workspace>) -> LinkComputer {
        LinkComputer {
            tokenizer,
            workspace,
        }
    }

    /// All links in source order by category: inline links (nested ones
    /// directly after their parent), reference links and shorthands,
    /// autolinks, then definitions.
    pub fn get_all_links(&self, doc: &Document, token: &CancellationToken) -> Vec<Link> {
        let tokens = self.tokenizer.tokenize(doc);
        if token.is_cancelled() {
            return Vec::new();
        }
        let mut no_link = NoLinkRanges::compute(&tokens, doc);

        let inline = self.inline_links(doc, &no_link);
        // Consumed inline links must not yield reference-style matches
        // inside their text.
        for link in &inline {
            no_link.add(link.source.range.offsets.clone());
        }

        let mut links: Vec<Link> = inline.into_iter().map(Link::Inline).collect();
        links.extend(
            self.reference_links(doc, &no_link)
                .into_iter()
                .map(Link::Inline),
        );
        links.extend(self.auto_links(doc, &no_link).into_iter().map(Link::Inline));
        links.extend(
            self.definitions(doc, &no_link)
                .into_iter()
                .map(Link::Definition),
        );
        links
    }

    fn inline_links(&self, doc: &Document, no_link: &NoLinkRanges) -> Vec<InlineLink> {
        let mut out = Vec::new();
        for caps in INLINE_LINK_RE.captures_iter(doc.text()) {
            let full = caps.get(0).expect("match group 0");
            if no_link.contains(full.start()) {
                continue;
            }
            if let Some(link) = self.inline_link_from_caps(doc, &caps, 0) {
                out.push(link);
            }
            // One re-scan of the matched text surfaces links nested inside
            // this link's own label, e.g. an image used as the label.
            if let Some(text) = caps.name("text") {
                for nested in INLINE_LINK_RE.captures_iter(text.as_str()) {
                    if let Some(link) = self.inline_link_from_caps(doc, &nested, text.start()) {
                        out.push(link);
                    }
                }
            }
        }
        out
    }

    fn inline_link_from_caps(
        &self,
        doc: &Document,
        caps: &Captures<'_>,
        base: usize,
    ) -> Option<InlineLink> {
        let full = caps.get(0)?;
        let target = caps.name("target")?;
        let dest = caps.name("dest")?;

        let raw = dest.as_str();
        let (href_start, href_end, href_text) =
            if raw.starts_with('<') && raw.ends_with('>') && raw.len() >= 2 {
                (
                    base + dest.start() + 1,
                    base + dest.end() - 1,
                    &raw[1..raw.len() - 1],
                )
            } else {
                (base + dest.start(), base + dest.end(), raw)
            };
        if href_text.is_empty() {
            return None;
        }

        let href = create_href(&*self.workspace, doc.uri(), href_text)?;
        let source = link_source(
            doc,
            base + full.start()..base + full.end(),
            base + target.start()..base + target.end(),
            href_start..href_end,
            href_text,
        );
        Some(InlineLink { href, source })
    }

    fn reference_links(&self, doc: &Document, no_link: &NoLinkRanges) -> Vec<InlineLink> {
        let text = doc.text();
        let mut out = Vec::new();
        for caps in REFERENCE_LINK_RE.captures_iter(text) {
            let full = caps.get(0).expect("match group 0");
            let prefix = caps.name("prefix").expect("prefix group");
            let label = caps.name("label").expect("label group");
            let open = prefix.end();

            if no_link.contains(open) {
                continue;
            }
            // `(` means an inline link already owns this label, `:` a
            // definition, `[` a bracket run this pattern cannot segment.
            if matches!(
                text[full.end()..].chars().next(),
                Some('(') | Some(':') | Some('[')
            ) {
                continue;
            }
            let label_text = label.as_str();
            if label_text.starts_with('^') {
                continue;
            }

            let (name, name_range) = match caps.name("ref") {
                Some(reference) if !reference.as_str().is_empty() => {
                    (reference.as_str(), reference.range())
                }
                Some(_) => (label_text, label.range()),
                None => {
                    if matches!(label_text, "x" | "X" | " ")
                        && is_checkbox_context(text, open)
                    {
                        continue;
                    }
                    (label_text, label.range())
                }
            };

            out.push(InlineLink {
                href: Href::Reference {
                    name: name.to_string(),
                },
                source: LinkSource {
                    range: doc.span(open..full.end()),
                    target_range: doc.span(name_range.clone()),
                    href_text: name.to_string(),
                    path_text: name.to_string(),
                    href_range: doc.span(name_range),
                    fragment_range: None,
                },
            });
        }
        out
    }

    fn auto_links(&self, doc: &Document, no_link: &NoLinkRanges) -> Vec<InlineLink> {
        let mut out = Vec::new();
        for caps in AUTO_LINK_RE.captures_iter(doc.text()) {
            let full = caps.get(0).expect("match group 0");
            if no_link.contains(full.start()) {
                continue;
            }
            let dest = caps.name("dest").expect("dest group");
            let uri = match Url::parse(dest.as_str()) {
                Ok(uri) => uri,
                Err(_) => continue,
            };
            let source = link_source(
                doc,
                full.range(),
                dest.range(),
                dest.range(),
                dest.as_str(),
            );
            out.push(InlineLink {
                href: Href::External { uri },
                source,
            });
        }
        out
    }

    fn definitions(&self, doc: &Document, no_link: &NoLinkRanges) -> Vec<LinkDefinition> {
        let mut out = Vec::new();
        for caps in DEFINITION_RE.captures_iter(doc.text()) {
            let full = caps.get(0).expect("match group 0");
            if no_link.contains(full.start()) {
                continue;
            }
            let label = caps.name("label").expect("label group");
            let dest = caps.name("dest").expect("dest group");

            let raw = dest.as_str();
            let (href_start, href_end, href_text) =
                if raw.starts_with('<') && raw.ends_with('>') && raw.len() >= 2 {
                    (dest.start() + 1, dest.end() - 1, &raw[1..raw.len() - 1])
                } else {
                    (dest.start(), dest.end(), raw)
                };
            if href_text.is_empty() {
                continue;
            }
            let href = match create_href(&*self.workspace, doc.uri(), href_text) {
                Some(href) => href,
                None => continue,
            };

            let target_end = caps.name("title").map(|t| t.end()).unwrap_or(dest.end());
            out.push(LinkDefinition {
                href,
                name: label.as_str().to_string(),
                name_range: doc.span(label.range()),
                source: link_source(
                    doc,
                    full.range(),
                    dest.start()..target_end,
                    href_start..href_end,
                    href_text,
                ),
            });
        }
        out
    }
}

fn is_checkbox_context(text: &str, open: usize) -> bool {
    let line_start = text[..open].rfind('\n').map(|i| i + 1).unwrap_or(0);
    CHECKBOX_PREFIX_RE.is_match(&text[line_start..open])
}
