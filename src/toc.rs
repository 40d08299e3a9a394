//! Document outlines with stable heading anchors.
//!
//! A [`TableOfContents`] is built once per document version from the token
//! stream and never patched incrementally. Slugs are unique within one
//! table: a heading whose normalized text collides with an earlier one is
//! disambiguated with a `-<n>` suffix, counted in document order.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tower_lsp::lsp_types::{Position, Range, Url};

use crate::cache::{BoxFuture, ComputeFn, DocCache};
use crate::document::Document;
use crate::slug::{Slug, Slugifier};
use crate::tokenize::{TokenKind, Tokenizer};
use crate::workspace::{ContainingDocument, Workspace};

#[derive(Debug, Clone)]
pub struct TocEntry {
    pub slug: Slug,
    /// Display text with inline markup stripped.
    pub text: String,
    /// 1 is the top level.
    pub level: usize,
    /// 0-based source line of the heading.
    pub line: usize,
    /// From the heading line to just before the next heading of equal or
    /// lesser level, or document end.
    pub section_range: Range,
    /// The heading line(s) themselves.
    pub heading_range: Range,
    /// The heading's text span only.
    pub heading_text_range: Range,
}

#[derive(Debug, Clone)]
pub struct TableOfContents {
    entries: Vec<TocEntry>,
}

static EMPTY: Lazy<Arc<TableOfContents>> = Lazy::new(|| {
    Arc::new(TableOfContents {
        entries: Vec::new(),
    })
});

impl TableOfContents {
    /// The outline for documents that cannot be loaded.
    pub fn empty() -> Arc<TableOfContents> {
        EMPTY.clone()
    }

    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    /// Finds the entry a link fragment addresses. The fragment is
    /// percent-decoded and normalized through the same slugifier that
    /// produced the anchors.
    pub fn lookup(&self, fragment: &str, slugifier: &dyn Slugifier) -> Option<&TocEntry> {
        let decoded = urlencoding::decode(fragment)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| fragment.to_string());
        let slug = slugifier.from_heading(&decoded);
        self.entries.iter().find(|entry| entry.slug.equals(&slug))
    }

    pub fn create(
        tokenizer: &dyn Tokenizer,
        slugifier: &dyn Slugifier,
        doc: &Document,
    ) -> TableOfContents {
        let tokens = tokenizer.tokenize(doc);

        struct RawHeading {
            text: String,
            level: usize,
            line: usize,
            end_line: usize,
            text_col: usize,
            text_len: usize,
        }

        let mut raw: Vec<RawHeading> = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            if token.kind != TokenKind::HeadingOpen {
                continue;
            }
            let map = match token.map {
                Some(map) => map,
                None => continue,
            };
            let inline = match tokens.get(i + 1) {
                Some(t) if t.kind == TokenKind::Inline => t,
                _ => continue,
            };
            let text: String = inline
                .children
                .iter()
                .filter(|c| {
                    matches!(
                        c.kind,
                        TokenKind::Text | TokenKind::CodeInline | TokenKind::Emoji
                    )
                })
                .map(|c| c.content.as_str())
                .collect();

            let line = map[0];
            let line_text = doc.line(line).unwrap_or_default();
            let text_col = line_text
                .find(inline.content.as_str())
                .map(|byte| line_text[..byte].chars().count())
                .unwrap_or(0);
            raw.push(RawHeading {
                text,
                level: heading_level(&token.markup),
                line,
                end_line: map[1].saturating_sub(1),
                text_col,
                text_len: inline.content.chars().count(),
            });
        }

        let last_line = doc.line_count().saturating_sub(1);
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut entries = Vec::with_capacity(raw.len());
        for (i, heading) in raw.iter().enumerate() {
            let base = slugifier.from_heading(&heading.text);
            let slug = match seen.get_mut(base.value()) {
                Some(count) => {
                    let disambiguated = Slug::new(format!("{}-{}", base.value(), count));
                    *count += 1;
                    disambiguated
                }
                None => {
                    seen.insert(base.value().to_string(), 1);
                    base
                }
            };

            let section_end = raw[i + 1..]
                .iter()
                .find(|next| next.level <= heading.level)
                .map(|next| next.line.saturating_sub(1))
                .unwrap_or(last_line);

            entries.push(TocEntry {
                slug,
                text: heading.text.clone(),
                level: heading.level,
                line: heading.line,
                section_range: line_span(doc, heading.line, section_end),
                heading_range: line_span(doc, heading.line, heading.end_line),
                heading_text_range: Range {
                    start: Position::new(heading.line as u32, heading.text_col as u32),
                    end: Position::new(
                        heading.line as u32,
                        (heading.text_col + heading.text_len) as u32,
                    ),
                },
            });
        }

        TableOfContents { entries }
    }

    /// The outline of a composite document is the union of its children's
    /// outlines, in child order.
    pub async fn create_for_containing_doc(
        tokenizer: &dyn Tokenizer,
        slugifier: &dyn Slugifier,
        workspace: &dyn Workspace,
        container: &ContainingDocument,
    ) -> TableOfContents {
        let mut entries = Vec::new();
        for child in &container.children {
            if let Some(doc) = workspace.open_markdown_document(child).await {
                entries.extend(TableOfContents::create(tokenizer, slugifier, &doc).entries);
            }
        }
        TableOfContents { entries }
    }
}

fn heading_level(markup: &str) -> usize {
    match markup {
        "=" => 1,
        "-" => 2,
        run => run.len(),
    }
}

fn line_span(doc: &Document, start_line: usize, end_line: usize) -> Range {
    Range {
        start: Position::new(start_line as u32, 0),
        end: Position::new(end_line as u32, doc.line_len(end_line) as u32),
    }
}

/// Caches one outline per document; composite documents are rebuilt from
/// their children.
pub struct TocProvider {
    cache: Arc<DocCache<Arc<TableOfContents>>>,
    slugifier: Arc<dyn Slugifier>,
}

impl TocProvider {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        slugifier: Arc<dyn Slugifier>,
        workspace: Arc<dyn Workspace>,
    ) -> TocProvider {
        let compute: ComputeFn<Arc<TableOfContents>> = {
            let tokenizer = tokenizer.clone();
            let slugifier = slugifier.clone();
            let workspace = workspace.clone();
            Arc::new(move |doc: Document| {
                let tokenizer = tokenizer.clone();
                let slugifier = slugifier.clone();
                let workspace = workspace.clone();
                let fut: BoxFuture<Arc<TableOfContents>> = Box::pin(async move {
                    match workspace.get_containing_document(doc.uri()) {
                        Some(container) if container.uri == *doc.uri() => Arc::new(
                            TableOfContents::create_for_containing_doc(
                                &*tokenizer,
                                &*slugifier,
                                &*workspace,
                                &container,
                            )
                            .await,
                        ),
                        _ => Arc::new(TableOfContents::create(&*tokenizer, &*slugifier, &doc)),
                    }
                });
                fut
            })
        };

        TocProvider {
            cache: DocCache::new(workspace, compute),
            slugifier,
        }
    }

    /// The outline for a URI, or the empty outline when the document cannot
    /// be loaded.
    pub async fn get(&self, uri: &Url) -> Arc<TableOfContents> {
        self.cache
            .get(uri)
            .await
            .unwrap_or_else(TableOfContents::empty)
    }

    pub async fn get_for_document(&self, doc: &Document) -> Arc<TableOfContents> {
        self.cache.get_for_document(doc).await
    }

    pub fn slugifier(&self) -> &Arc<dyn Slugifier> {
        &self.slugifier
    }

    pub fn dispose(&self) {
        self.cache.dispose();
    }
}
