//! Link validation diagnostics.
//!
//! [`DiagnosticsComputer`] is stateless: it classifies every internal link
//! of a document by existence of its target file and, when the file exists,
//! existence of the requested fragment as a heading, and checks reference
//! links against the document's definition set. Validation failures surface
//! as diagnostics, never as errors; a link excluded by an `ignore_links`
//! glob is skipped entirely.
//!
//! [`DiagnosticsManager`] adds the incremental layer: each validated
//! document remembers the set of filesystem paths its links touched, and a
//! recomputation for the same document version reuses the prior result
//! unless a watcher event has since hit one of those paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Range, Url};

use crate::config::{DiagnosticLevel, Settings};
use crate::document::Document;
use crate::document_links::{is_line_locator, LinkProvider};
use crate::event::{EventEmitter, Listener, Subscription};
use crate::links::{Href, Link, LinkSource};
use crate::toc::TocProvider;
use crate::workspace::{FileChange, Workspace};

#[derive(Debug)]
pub struct DiagnosticsReport {
    pub diagnostics: Vec<Diagnostic>,
    /// Every path probed during validation, with its existence result.
    pub touched_paths: HashMap<Url, bool>,
}

pub struct DiagnosticsComputer {
    workspace: Arc<dyn Workspace>,
    links: Arc<LinkProvider>,
    toc: Arc<TocProvider>,
}

impl DiagnosticsComputer {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        links: Arc<LinkProvider>,
        toc: Arc<TocProvider>,
    ) -> DiagnosticsComputer {
        DiagnosticsComputer {
            workspace,
            links,
            toc,
        }
    }

    pub async fn compute(&self, doc: &Document, settings: &Settings) -> DiagnosticsReport {
        let set = self.links.get_links_for_document(doc).await;
        let ignore = build_ignore_globs(&settings.ignore_links);

        let mut diagnostics = Vec::new();
        let mut touched: HashMap<Url, bool> = HashMap::new();
        // Target path → the URI that actually exists (possibly with a
        // markdown extension appended), or None when nothing does. One stat
        // round per distinct path, however many links share it.
        let mut resolved: HashMap<Url, Option<Url>> = HashMap::new();

        for link in set.links.iter() {
            match link.href() {
                Href::External { .. } => {}

                Href::Reference { name } => {
                    if !matches!(link, Link::Inline(_)) {
                        continue;
                    }
                    let Some(severity) = severity_of(settings.validate_references) else {
                        continue;
                    };
                    if set.definitions.lookup(name).is_none() {
                        diagnostics.push(diagnostic(
                            link.source().href_range.range,
                            format!("No link definition found: '{name}'"),
                            severity,
                        ));
                    }
                }

                Href::Internal { path, fragment } => {
                    let source = link.source();
                    if is_ignored(&ignore, source) {
                        continue;
                    }

                    if path == doc.uri() {
                        if fragment.is_empty() || is_line_locator(fragment) {
                            continue;
                        }
                        let Some(severity) = severity_of(settings.validate_fragment_links) else {
                            continue;
                        };
                        let toc = self.toc.get_for_document(doc).await;
                        if toc.lookup(fragment, &**self.toc.slugifier()).is_none() {
                            diagnostics.push(diagnostic(
                                fragment_or_href_range(source),
                                format!("No heading found: '#{fragment}'"),
                                severity,
                            ));
                        }
                        continue;
                    }

                    let target = match resolved.get(path) {
                        Some(cached) => cached.clone(),
                        None => {
                            let probed = self.probe(path, &mut touched).await;
                            resolved.insert(path.clone(), probed.clone());
                            probed
                        }
                    };

                    match target {
                        None => {
                            if let Some(severity) = severity_of(settings.validate_file_links) {
                                diagnostics.push(diagnostic(
                                    source.href_range.range,
                                    format!("File does not exist at path: {}", path.path()),
                                    severity,
                                ));
                            }
                        }
                        Some(target) => {
                            if fragment.is_empty() || is_line_locator(fragment) {
                                continue;
                            }
                            if !self.workspace.is_markdown_path(&target) {
                                continue;
                            }
                            let Some(severity) =
                                severity_of(settings.markdown_file_link_fragments())
                            else {
                                continue;
                            };
                            let Some(target_doc) =
                                self.workspace.open_markdown_document(&target).await
                            else {
                                continue;
                            };
                            let toc = self.toc.get_for_document(&target_doc).await;
                            if toc.lookup(fragment, &**self.toc.slugifier()).is_none() {
                                diagnostics.push(diagnostic(
                                    fragment_or_href_range(source),
                                    format!(
                                        "No heading found in '{}': '#{}'",
                                        target.path(),
                                        fragment
                                    ),
                                    severity,
                                ));
                            }
                        }
                    }
                }
            }
        }

        DiagnosticsReport {
            diagnostics,
            touched_paths: touched,
        }
    }

    /// Stats a link target, retrying with a markdown extension appended for
    /// extensionless paths. Records every probed path.
    async fn probe(&self, path: &Url, touched: &mut HashMap<Url, bool>) -> Option<Url> {
        let exists = self.workspace.stat(path).await.is_some();
        touched.insert(path.clone(), exists);
        if exists {
            return Some(path.clone());
        }
        let with_ext = self.workspace.append_markdown_extension(path)?;
        let exists = self.workspace.stat(&with_ext).await.is_some();
        touched.insert(with_ext.clone(), exists);
        exists.then_some(with_ext)
    }
}

fn severity_of(level: DiagnosticLevel) -> Option<DiagnosticSeverity> {
    match level {
        DiagnosticLevel::Off => None,
        DiagnosticLevel::Warning => Some(DiagnosticSeverity::WARNING),
        DiagnosticLevel::Error => Some(DiagnosticSeverity::ERROR),
    }
}

fn diagnostic(range: Range, message: String, severity: DiagnosticSeverity) -> Diagnostic {
    Diagnostic {
        range,
        message,
        source: Some("mdnav".into()),
        severity: Some(severity),
        ..Default::default()
    }
}

fn fragment_or_href_range(source: &LinkSource) -> Range {
    source
        .fragment_range
        .as_ref()
        .map(|span| span.range)
        .unwrap_or(source.href_range.range)
}

/// Globs are matched against the raw href text and the raw path text, never
/// the resolved target. A fragment-only glob like `#header` therefore
/// matches only the current document's own fragment links.
fn build_ignore_globs(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

fn is_ignored(globs: &GlobSet, source: &LinkSource) -> bool {
    if globs.is_empty() {
        return false;
    }
    globs.is_match(source.href_text.as_str()) || globs.is_match(source.path_text.as_str())
}

struct ValidationState {
    version: i32,
    dirty: bool,
    touched: HashMap<Url, bool>,
    diagnostics: Arc<Vec<Diagnostic>>,
}

/// Tracks validation state per document so unchanged documents are never
/// re-probed. A watcher event invalidates exactly the tracked documents
/// whose touched-path set contains the changed path (deletes included:
/// every document that referenced that exact path revalidates).
pub struct DiagnosticsManager {
    computer: Arc<DiagnosticsComputer>,
    states: Arc<Mutex<HashMap<Url, ValidationState>>>,
    needs_revalidation: Arc<EventEmitter<Url>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl DiagnosticsManager {
    pub fn new(workspace: &dyn Workspace, computer: Arc<DiagnosticsComputer>) -> DiagnosticsManager {
        let states: Arc<Mutex<HashMap<Url, ValidationState>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let needs_revalidation = Arc::new(EventEmitter::new());

        let states_for_files = states.clone();
        let emitter = needs_revalidation.clone();
        let on_file_change = workspace.on_did_change_file(Arc::new(move |change: &FileChange| {
            let mut invalidated = Vec::new();
            {
                let mut states = states_for_files.lock().expect("validation states poisoned");
                for (uri, state) in states.iter_mut() {
                    if !state.dirty && state.touched.contains_key(&change.uri) {
                        state.dirty = true;
                        invalidated.push(uri.clone());
                    }
                }
            }
            for uri in invalidated {
                emitter.emit(&uri);
            }
        }));

        let states_for_deletes = states.clone();
        let on_doc_delete = workspace.on_did_delete_markdown_document(Arc::new(move |uri: &Url| {
            states_for_deletes
                .lock()
                .expect("validation states poisoned")
                .remove(uri);
        }));

        DiagnosticsManager {
            computer,
            states,
            needs_revalidation,
            subscriptions: Mutex::new(vec![on_file_change, on_doc_delete]),
        }
    }

    /// Diagnostics for a document. Reuses the previous result when the
    /// version matches and no touched path changed in between; otherwise
    /// delegates to the stateless computer and records the new state.
    pub async fn compute(&self, doc: &Document, settings: &Settings) -> Arc<Vec<Diagnostic>> {
        {
            let states = self.states.lock().expect("validation states poisoned");
            if let Some(state) = states.get(doc.uri()) {
                if state.version == doc.version() && !state.dirty {
                    return state.diagnostics.clone();
                }
            }
        }

        let report = self.computer.compute(doc, settings).await;
        let diagnostics = Arc::new(report.diagnostics);
        self.states
            .lock()
            .expect("validation states poisoned")
            .insert(
                doc.uri().clone(),
                ValidationState {
                    version: doc.version(),
                    dirty: false,
                    touched: report.touched_paths,
                    diagnostics: diagnostics.clone(),
                },
            );
        diagnostics
    }

    /// Fires with the URI of a tracked document whose diagnostics went
    /// stale; the embedder should recompute and re-push them.
    pub fn on_needs_revalidation(&self, listener: Listener<Url>) -> Subscription {
        self.needs_revalidation.subscribe(listener)
    }

    /// Releases the filesystem-watch subscriptions and drops all tracked
    /// state. Idempotent.
    pub fn dispose(&self) {
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .expect("subscription list poisoned"),
        );
        for subscription in &subscriptions {
            subscription.dispose();
        }
        self.states
            .lock()
            .expect("validation states poisoned")
            .clear();
    }
}

impl Drop for DiagnosticsManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slug::GithubSlugifier;
    use crate::test_utils::CountingWorkspace;
    use crate::tokenize::{BlockTokenizer, Tokenizer};
    use crate::workspace::InMemoryWorkspace;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(uri: &str, text: &str) -> Document {
        Document::new(Url::parse(uri).unwrap(), 0, text)
    }

    fn computer_over(ws: Arc<dyn Workspace>) -> DiagnosticsComputer {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(BlockTokenizer);
        let toc = Arc::new(TocProvider::new(
            tokenizer.clone(),
            Arc::new(GithubSlugifier),
            ws.clone(),
        ));
        let links = Arc::new(LinkProvider::new(tokenizer, ws.clone(), toc.clone()));
        DiagnosticsComputer::new(ws, links, toc)
    }

    fn workspace() -> Arc<InMemoryWorkspace> {
        Arc::new(InMemoryWorkspace::new(Some(
            Url::parse("file:///ws/").unwrap(),
        )))
    }

    /// Test: a link to a missing file produces exactly one diagnostic
    /// spanning the path text; a valid self-link produces none.
    #[tokio::test]
    async fn test_missing_file_diagnostic() {
        let ws = workspace();
        let text = "[bad](/no/such.md) [good](/doc.md)";
        let source = doc("file:///ws/doc.md", text);
        ws.add_document(source.clone());

        let computer = computer_over(ws.clone());
        let report = computer.compute(&source, &Settings::default()).await;

        assert_eq!(report.diagnostics.len(), 1);
        let diag = &report.diagnostics[0];
        assert!(diag.message.contains("/no/such.md"));
        assert_eq!(diag.source, Some("mdnav".to_string()));
        assert_eq!(diag.severity, Some(DiagnosticSeverity::WARNING));

        // The range covers exactly the href text between the parentheses.
        let start = text.find("/no/such.md").unwrap();
        assert_eq!(diag.range.start.character as usize, start);
        assert_eq!(
            diag.range.end.character as usize,
            start + "/no/such.md".len()
        );
    }

    /// Test: own-document fragments validate against the document's own
    /// outline.
    #[tokio::test]
    async fn test_own_fragment_validation() {
        let ws = workspace();
        let source = doc(
            "file:///ws/doc.md",
            "# Real\n\n[ok](#real) [broken](#phantom)\n",
        );
        ws.add_document(source.clone());

        let computer = computer_over(ws.clone());
        let report = computer.compute(&source, &Settings::default()).await;

        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].message.contains("#phantom"));
    }

    /// Test: cross-file fragments inherit the fragment severity, and an
    /// explicit override silences them independently.
    #[tokio::test]
    async fn test_cross_file_fragment_severity() {
        let ws = workspace();
        ws.add_document(doc("file:///ws/other.md", "# Only\n"));
        let source = doc("file:///ws/doc.md", "[x](other.md#missing)");
        ws.add_document(source.clone());

        let computer = computer_over(ws.clone());

        let settings = Settings {
            validate_fragment_links: DiagnosticLevel::Error,
            ..Settings::default()
        };
        let report = computer.compute(&source, &settings).await;
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(
            report.diagnostics[0].severity,
            Some(DiagnosticSeverity::ERROR)
        );

        let settings = Settings {
            validate_markdown_file_link_fragments: Some(DiagnosticLevel::Off),
            ..Settings::default()
        };
        let report = computer.compute(&source, &settings).await;
        assert!(report.diagnostics.is_empty());
    }

    /// Test: a reference with no matching definition is reported;
    /// case-sensitive matches are honored.
    #[tokio::test]
    async fn test_reference_validation() {
        let ws = workspace();
        let source = doc(
            "file:///ws/doc.md",
            "[missing][nope] and [found][yes]\n\n[yes]: https://example.com\n",
        );
        ws.add_document(source.clone());

        let computer = computer_over(ws.clone());
        let report = computer.compute(&source, &Settings::default()).await;

        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].message.contains("'nope'"));
    }

    /// Test: ignore globs suppress diagnostics for matching paths
    /// regardless of existence, and fragment-only globs apply only to the
    /// current document's own fragment links.
    #[tokio::test]
    async fn test_ignore_globs() {
        let ws = workspace();
        let source = doc(
            "file:///ws/doc.md",
            "![img](/images/shots/a.png) [frag](#gone) [other](other.md#gone)\n",
        );
        ws.add_document(source.clone());
        ws.add_document(doc("file:///ws/other.md", "# Only\n"));

        let computer = computer_over(ws.clone());
        let settings = Settings {
            ignore_links: vec!["/images/**/*.png".to_string(), "#gone".to_string()],
            ..Settings::default()
        };
        let report = computer.compute(&source, &settings).await;

        // The image and the own-document fragment are suppressed; the
        // cross-file fragment still validates (and fails).
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].message.contains("other.md"));
    }

    /// Test: an email in angle brackets is not a link and produces no
    /// diagnostic.
    #[tokio::test]
    async fn test_email_not_validated() {
        let ws = workspace();
        let source = doc("file:///ws/doc.md", "contact <user@example.com>\n");
        ws.add_document(source.clone());

        let computer = computer_over(ws.clone());
        let report = computer.compute(&source, &Settings::default()).await;
        assert!(report.diagnostics.is_empty());
    }

    /// Test: disabling file-link validation drops missing-file diagnostics.
    #[tokio::test]
    async fn test_file_links_off() {
        let ws = workspace();
        let source = doc("file:///ws/doc.md", "[bad](gone.md)");
        ws.add_document(source.clone());

        let computer = computer_over(ws.clone());
        let settings = Settings {
            validate_file_links: DiagnosticLevel::Off,
            ..Settings::default()
        };
        let report = computer.compute(&source, &settings).await;
        assert!(report.diagnostics.is_empty());
    }

    /// Test: repeated validation of an unchanged document does not stat
    /// again; creating the missing target invalidates and the diagnostic
    /// disappears on recompute.
    #[tokio::test]
    async fn test_manager_incremental_revalidation() {
        let ws = workspace();
        let counting = Arc::new(CountingWorkspace::new(ws.clone()));
        let source = doc("file:///ws/doc.md", "[bad](other.md)");
        ws.add_document(source.clone());

        let computer = Arc::new(computer_over(counting.clone()));
        let manager = DiagnosticsManager::new(&*counting, computer);

        let revalidations = Arc::new(AtomicUsize::new(0));
        let revalidations2 = revalidations.clone();
        let _sub = manager.on_needs_revalidation(Arc::new(move |_uri: &Url| {
            revalidations2.fetch_add(1, Ordering::SeqCst);
        }));

        let first = manager.compute(&source, &Settings::default()).await;
        assert_eq!(first.len(), 1);
        let stats_after_first = counting.stat_calls();
        assert!(stats_after_first > 0);

        // Same version, no filesystem change: cached result, no stats.
        let second = manager.compute(&source, &Settings::default()).await;
        assert_eq!(second.len(), 1);
        assert_eq!(counting.stat_calls(), stats_after_first);

        // The missing target appears: tracked state goes stale and the
        // diagnostic clears on the next compute.
        ws.add_document(doc("file:///ws/other.md", "# Now Exists\n"));
        assert_eq!(revalidations.load(Ordering::SeqCst), 1);
        let third = manager.compute(&source, &Settings::default()).await;
        assert!(third.is_empty());
    }

    /// Test: deleting a tracked document drops its validation state.
    #[tokio::test]
    async fn test_manager_drops_deleted_documents() {
        let ws = workspace();
        let source = doc("file:///ws/doc.md", "[bad](gone.md)");
        ws.add_document(source.clone());

        let computer = Arc::new(computer_over(ws.clone()));
        let manager = DiagnosticsManager::new(&*ws, computer);
        manager.compute(&source, &Settings::default()).await;
        assert_eq!(manager.states.lock().unwrap().len(), 1);

        ws.remove_document(source.uri());
        assert!(manager.states.lock().unwrap().is_empty());
    }

    /// Test: disposal detaches the manager from watcher events.
    #[tokio::test]
    async fn test_manager_dispose() {
        let ws = workspace();
        let source = doc("file:///ws/doc.md", "[bad](other.md)");
        ws.add_document(source.clone());

        let computer = Arc::new(computer_over(ws.clone()));
        let manager = DiagnosticsManager::new(&*ws, computer);
        manager.compute(&source, &Settings::default()).await;

        manager.dispose();
        manager.dispose();
        ws.add_document(doc("file:///ws/other.md", "# Late\n"));
        assert!(manager.states.lock().unwrap().is_empty());
    }
}
