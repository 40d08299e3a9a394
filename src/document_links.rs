//! DocumentLink provider — cached link sets with two-phase target
//! resolution.
//!
//! `provide_document_links` resolves external hrefs eagerly and defers
//! internal targets: the emitted link carries an opaque `data` payload with
//! the original href, and `resolve_document_link` later stats the target,
//! retries with a markdown extension, and looks headings up through the
//! table of contents — without re-parsing the document. Reference links
//! resolve immediately to their definition, or are dropped when no
//! definition matches.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_lsp::lsp_types::{DocumentLink, Position, Url};

use crate::cache::{BoxFuture, ComputeFn, DocCache, WorkspaceCache};
use crate::cancel::CancellationToken;
use crate::document::Document;
use crate::links::{create_href, Href, Link, LinkComputer, LinkDefinitionSet, LinkSource};
use crate::toc::TocProvider;
use crate::tokenize::Tokenizer;
use crate::workspace::Workspace;

pub const REVEAL_FOLDER_COMMAND: &str = "mdnav.reveal";
pub const OPEN_AT_POSITION_COMMAND: &str = "mdnav.open";

static LINE_LOCATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^L(?<line>\d+)(?:,(?<col>\d+))?$").unwrap());

/// Whether a fragment is a 1-based `L<line>[,<col>]` locator rather than a
/// heading anchor.
pub(crate) fn is_line_locator(fragment: &str) -> bool {
    LINE_LOCATOR_RE.is_match(fragment)
}

/// A document's links partitioned into the ordered link list and the
/// definition set built from its `Definition`-kind links.
#[derive(Clone)]
pub struct LinkSet {
    pub links: Arc<Vec<Link>>,
    pub definitions: Arc<LinkDefinitionSet>,
}

/// Payload attached to a deferred internal link; round-trips through the
/// consumer untouched.
#[derive(Debug, Serialize, Deserialize)]
struct DeferredLinkData {
    source: Url,
    path: Url,
    fragment: String,
}

/// The resolved destination of a link string.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkTarget {
    File {
        uri: Url,
        position: Option<Position>,
        fragment: Option<String>,
    },
    Folder {
        uri: Url,
    },
    External {
        uri: Url,
    },
}

pub struct LinkProvider {
    workspace: Arc<dyn Workspace>,
    toc: Arc<TocProvider>,
    cache: Arc<DocCache<LinkSet>>,
    workspace_links: Arc<WorkspaceCache<LinkSet>>,
}

impl LinkProvider {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        workspace: Arc<dyn Workspace>,
        toc: Arc<TocProvider>,
    ) -> LinkProvider {
        let computer = Arc::new(LinkComputer::new(tokenizer, workspace.clone()));
        let compute: ComputeFn<LinkSet> = Arc::new(move |doc: Document| {
            let computer = computer.clone();
            let fut: BoxFuture<LinkSet> = Box::pin(async move {
                let links = computer.get_all_links(&doc, &CancellationToken::new());
                let definitions = LinkDefinitionSet::new(&links);
                LinkSet {
                    links: Arc::new(links),
                    definitions: Arc::new(definitions),
                }
            });
            fut
        });

        let cache = DocCache::new(workspace.clone(), compute.clone());
        let workspace_links = WorkspaceCache::new(workspace.clone(), compute);
        LinkProvider {
            workspace,
            toc,
            cache,
            workspace_links,
        }
    }

    /// The cached link set for a URI; loads the document on demand.
    pub async fn get_links(&self, uri: &Url) -> Option<LinkSet> {
        self.cache.get(uri).await
    }

    pub async fn get_links_for_document(&self, doc: &Document) -> LinkSet {
        self.cache.get_for_document(doc).await
    }

    /// Links of every document in the workspace, from the eagerly-seeded
    /// workspace cache.
    pub async fn get_links_for_all_documents(&self) -> Vec<(Url, LinkSet)> {
        self.workspace_links.entries().await
    }

    pub async fn get_links_for_docs(&self, docs: &[Document]) -> Vec<LinkSet> {
        self.workspace_links.get_for_docs(docs).await
    }

    /// Maps each link to a protocol link record. External targets resolve
    /// eagerly; internal targets are deferred behind a `data` payload;
    /// reference links resolve to their definition or are dropped.
    pub async fn provide_document_links(&self, doc: &Document) -> Vec<DocumentLink> {
        let set = self.get_links_for_document(doc).await;
        set.links
            .iter()
            .filter_map(|link| self.to_document_link(doc, link.href(), link.source(), &set))
            .collect()
    }

    fn to_document_link(
        &self,
        doc: &Document,
        href: &Href,
        source: &LinkSource,
        set: &LinkSet,
    ) -> Option<DocumentLink> {
        match href {
            Href::External { uri } => Some(DocumentLink {
                range: source.href_range.range,
                target: Some(uri.clone()),
                tooltip: Some("Follow link".to_string()),
                data: None,
            }),
            Href::Internal { path, fragment } => Some(DocumentLink {
                range: source.href_range.range,
                target: None,
                tooltip: Some("Follow link".to_string()),
                data: serde_json::to_value(DeferredLinkData {
                    source: doc.uri().clone(),
                    path: path.clone(),
                    fragment: fragment.clone(),
                })
                .ok(),
            }),
            Href::Reference { name } => {
                let definition = set.definitions.lookup(name)?;
                let position = definition.name_range.range.start;
                let mut target = doc.uri().clone();
                target.set_fragment(Some(&format!(
                    "L{},{}",
                    position.line + 1,
                    position.character + 1
                )));
                Some(DocumentLink {
                    range: source.href_range.range,
                    target: Some(target),
                    tooltip: Some("Go to link definition".to_string()),
                    data: None,
                })
            }
        }
    }

    /// Second phase for a deferred link: fills in an external URI, a
    /// reveal-folder command, or a jump-to-position target.
    pub async fn resolve_document_link(&self, link: &DocumentLink) -> Option<DocumentLink> {
        let data: DeferredLinkData = serde_json::from_value(link.data.clone()?).ok()?;
        let target = self
            .resolve_internal_target(&data.path, &data.fragment, &data.source)
            .await?;

        let mut resolved = link.clone();
        resolved.data = None;
        resolved.target = Some(match target {
            LinkTarget::External { uri } => uri,
            LinkTarget::Folder { uri } => {
                command_uri(REVEAL_FOLDER_COMMAND, &json!([uri.as_str()]))?
            }
            LinkTarget::File {
                uri,
                position: Some(position),
                ..
            } => {
                if uri.fragment().is_none() {
                    // A 1-based line locator keeps the target a plain URI.
                    let mut with_locator = uri;
                    with_locator.set_fragment(Some(&format!(
                        "L{},{}",
                        position.line + 1,
                        position.character + 1
                    )));
                    with_locator
                } else {
                    // The target already carries a fragment; appending a
                    // locator would be ambiguous, so jump via command.
                    command_uri(
                        OPEN_AT_POSITION_COMMAND,
                        &json!([uri.as_str(), { "line": position.line, "character": position.character }]),
                    )?
                }
            }
            LinkTarget::File { uri, .. } => uri,
        });
        Some(resolved)
    }

    /// Resolves an arbitrary link string against a source location,
    /// independent of any previously computed link.
    pub async fn resolve_link_target(&self, text: &str, from: &Url) -> Option<LinkTarget> {
        match create_href(&*self.workspace, from, text)? {
            Href::External { uri } => Some(LinkTarget::External { uri }),
            Href::Internal { path, fragment } => {
                self.resolve_internal_target(&path, &fragment, from).await
            }
            Href::Reference { .. } => None,
        }
    }

    async fn resolve_internal_target(
        &self,
        path: &Url,
        fragment: &str,
        source: &Url,
    ) -> Option<LinkTarget> {
        let mut target = path.clone();

        // A document embedded in a containing context cannot link to a
        // standalone workspace file, so skip the existence checks.
        if self.workspace.get_containing_document(source).is_none() {
            match self.workspace.stat(&target).await {
                Some(stat) if stat.is_directory => {
                    return Some(LinkTarget::Folder { uri: target });
                }
                Some(_) => {}
                None => {
                    if let Some(with_ext) = self.workspace.append_markdown_extension(&target) {
                        if self.workspace.stat(&with_ext).await.is_some() {
                            target = with_ext;
                        }
                    }
                }
            }
        }

        if fragment.is_empty() {
            return Some(LinkTarget::File {
                uri: target,
                position: None,
                fragment: None,
            });
        }

        // `L<line>[,<col>]` locators bypass heading lookup entirely.
        if let Some(caps) = LINE_LOCATOR_RE.captures(fragment) {
            let line = caps["line"].parse::<u32>().ok()?.saturating_sub(1);
            let character = caps
                .name("col")
                .and_then(|col| col.as_str().parse::<u32>().ok())
                .map(|col| col.saturating_sub(1))
                .unwrap_or(0);
            return Some(LinkTarget::File {
                uri: target,
                position: Some(Position::new(line, character)),
                fragment: Some(fragment.to_string()),
            });
        }

        if let Some(doc) = self.workspace.open_markdown_document(&target).await {
            let toc = self.toc.get_for_document(&doc).await;
            if let Some(entry) = toc.lookup(fragment, &**self.toc.slugifier()) {
                return Some(LinkTarget::File {
                    uri: target,
                    position: Some(entry.heading_range.start),
                    fragment: Some(fragment.to_string()),
                });
            }
        }

        Some(LinkTarget::File {
            uri: target,
            position: None,
            fragment: None,
        })
    }

    /// Tears down nested caches in reverse construction order. Idempotent.
    pub fn dispose(&self) {
        self.workspace_links.dispose();
        self.cache.dispose();
    }
}

fn command_uri(command: &str, args: &serde_json::Value) -> Option<Url> {
    Url::parse(&format!(
        "command:{}?{}",
        command,
        urlencoding::encode(&args.to_string())
    ))
    .ok()
}
