//! The workspace collaborator boundary.
//!
//! The engine never touches the filesystem directly: documents, stat
//! queries, and change notifications all flow through [`Workspace`].
//! [`InMemoryWorkspace`] is the built-in implementation — a keyed store of
//! documents and plain files, seeded either programmatically or from a
//! directory tree — and doubles as the test double for every cache in the
//! crate. Notifications raised by workspace mutations are the only trigger
//! for cache invalidation anywhere in the engine.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use itertools::Itertools;
use rayon::prelude::*;
use tower_lsp::async_trait;
use tower_lsp::lsp_types::Url;
use walkdir::WalkDir;

use crate::document::Document;
use crate::event::{EventEmitter, Listener, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_directory: bool,
}

/// A composite parent document (e.g. a notebook) whose children are
/// themselves markdown documents sharing one logical outline.
#[derive(Debug, Clone)]
pub struct ContainingDocument {
    pub uri: Url,
    pub children: Vec<Url>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

/// A watcher-level notification for any path, markdown or not.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub uri: Url,
    pub kind: FileChangeKind,
}

#[async_trait]
pub trait Workspace: Send + Sync {
    /// Resolves a URI to a markdown document, or `None` if the workspace
    /// does not know it.
    async fn open_markdown_document(&self, uri: &Url) -> Option<Document>;

    async fn get_all_markdown_documents(&self) -> Vec<Document>;

    async fn stat(&self, uri: &Url) -> Option<FileStat>;

    /// The composite document a URI belongs to (the URI may be the
    /// container itself or one of its children).
    fn get_containing_document(&self, uri: &Url) -> Option<ContainingDocument>;

    /// The workspace root owning a resource; absolute link paths resolve
    /// against it.
    fn get_workspace_folder(&self, uri: &Url) -> Option<Url>;

    fn markdown_file_extensions(&self) -> &[String];

    fn on_did_change_markdown_document(&self, listener: Listener<Document>) -> Subscription;
    fn on_did_create_markdown_document(&self, listener: Listener<Document>) -> Subscription;
    fn on_did_delete_markdown_document(&self, listener: Listener<Url>) -> Subscription;
    fn on_did_change_file(&self, listener: Listener<FileChange>) -> Subscription;

    fn is_markdown_path(&self, uri: &Url) -> bool {
        let ext = Path::new(uri.path())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        ext.is_some_and(|ext| {
            self.markdown_file_extensions()
                .iter()
                .any(|known| *known == ext)
        })
    }

    /// The same URI with the preferred markdown extension appended, or
    /// `None` when the path already looks like markdown.
    fn append_markdown_extension(&self, uri: &Url) -> Option<Url> {
        if self.is_markdown_path(uri) {
            return None;
        }
        let ext = self.markdown_file_extensions().first()?;
        let mut with_ext = uri.clone();
        with_ext.set_path(&format!("{}.{}", uri.path(), ext));
        Some(with_ext)
    }
}

#[derive(Default)]
struct WorkspaceState {
    docs: HashMap<Url, Document>,
    files: HashSet<Url>,
    containers: HashMap<Url, ContainingDocument>,
}

/// A keyed in-memory workspace. All mutations go through the `add`/
/// `update`/`remove` methods, which emit the matching notifications.
pub struct InMemoryWorkspace {
    root: Option<Url>,
    extensions: Vec<String>,
    state: Mutex<WorkspaceState>,
    changed: EventEmitter<Document>,
    created: EventEmitter<Document>,
    deleted: EventEmitter<Url>,
    file_changes: EventEmitter<FileChange>,
}

impl InMemoryWorkspace {
    pub fn new(root: Option<Url>) -> InMemoryWorkspace {
        InMemoryWorkspace {
            root,
            extensions: vec!["md".to_string(), "markdown".to_string()],
            state: Mutex::new(WorkspaceState::default()),
            changed: EventEmitter::new(),
            created: EventEmitter::new(),
            deleted: EventEmitter::new(),
            file_changes: EventEmitter::new(),
        }
    }

    /// Seeds a workspace from a directory tree: markdown files become
    /// documents, everything else becomes plain files. Hidden entries are
    /// skipped.
    pub fn from_root(root_dir: &Path) -> anyhow::Result<InMemoryWorkspace> {
        let root = Url::from_directory_path(root_dir)
            .map_err(|()| anyhow::anyhow!("workspace root is not an absolute path"))?;
        let workspace = InMemoryWorkspace::new(Some(root));

        let entries = WalkDir::new(root_dir)
            .into_iter()
            .filter_entry(|e| {
                !e.file_name()
                    .to_str()
                    .map(|s| s.starts_with('.'))
                    .unwrap_or(false)
            })
            .flatten()
            .filter(|e| e.file_type().is_file())
            .collect_vec();

        let (markdown, plain): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| {
            Url::from_file_path(e.path())
                .map(|uri| workspace.is_markdown_path(&uri))
                .unwrap_or(false)
        });

        let docs: HashMap<Url, Document> = markdown
            .par_iter()
            .flat_map(|entry| {
                let text = std::fs::read_to_string(entry.path())?;
                let uri = Url::from_file_path(entry.path())
                    .map_err(|()| std::io::Error::other("non-absolute path"))?;
                Ok::<(Url, Document), std::io::Error>((uri.clone(), Document::new(uri, 0, text)))
            })
            .collect();

        {
            let mut state = workspace.state.lock().expect("workspace state poisoned");
            state.docs = docs;
            state.files = plain
                .iter()
                .filter_map(|e| Url::from_file_path(e.path()).ok())
                .collect();
        }
        Ok(workspace)
    }

    pub fn add_document(&self, doc: Document) {
        let uri = doc.uri().clone();
        self.state
            .lock()
            .expect("workspace state poisoned")
            .docs
            .insert(uri.clone(), doc.clone());
        self.created.emit(&doc);
        self.file_changes.emit(&FileChange {
            uri,
            kind: FileChangeKind::Created,
        });
    }

    pub fn update_document(&self, doc: Document) {
        let uri = doc.uri().clone();
        self.state
            .lock()
            .expect("workspace state poisoned")
            .docs
            .insert(uri.clone(), doc.clone());
        self.changed.emit(&doc);
        self.file_changes.emit(&FileChange {
            uri,
            kind: FileChangeKind::Changed,
        });
    }

    pub fn remove_document(&self, uri: &Url) {
        self.state
            .lock()
            .expect("workspace state poisoned")
            .docs
            .remove(uri);
        self.deleted.emit(uri);
        self.file_changes.emit(&FileChange {
            uri: uri.clone(),
            kind: FileChangeKind::Deleted,
        });
    }

    /// Registers a non-markdown path as existing on disk.
    pub fn add_file(&self, uri: Url) {
        self.state
            .lock()
            .expect("workspace state poisoned")
            .files
            .insert(uri.clone());
        self.file_changes.emit(&FileChange {
            uri,
            kind: FileChangeKind::Created,
        });
    }

    pub fn remove_file(&self, uri: &Url) {
        self.state
            .lock()
            .expect("workspace state poisoned")
            .files
            .remove(uri);
        self.file_changes.emit(&FileChange {
            uri: uri.clone(),
            kind: FileChangeKind::Deleted,
        });
    }

    /// Registers a composite document; lookups resolve for the container
    /// and each of its children.
    pub fn set_containing_document(&self, container: ContainingDocument) {
        let mut state = self.state.lock().expect("workspace state poisoned");
        for child in &container.children {
            state.containers.insert(child.clone(), container.clone());
        }
        state
            .containers
            .insert(container.uri.clone(), container);
    }
}

#[async_trait]
impl Workspace for InMemoryWorkspace {
    async fn open_markdown_document(&self, uri: &Url) -> Option<Document> {
        self.state
            .lock()
            .expect("workspace state poisoned")
            .docs
            .get(uri)
            .cloned()
    }

    async fn get_all_markdown_documents(&self) -> Vec<Document> {
        self.state
            .lock()
            .expect("workspace state poisoned")
            .docs
            .values()
            .cloned()
            .collect()
    }

    async fn stat(&self, uri: &Url) -> Option<FileStat> {
        let state = self.state.lock().expect("workspace state poisoned");
        if state.docs.contains_key(uri) || state.files.contains(uri) {
            return Some(FileStat {
                is_directory: false,
            });
        }
        let prefix = format!("{}/", uri.as_str().trim_end_matches('/'));
        let is_dir = state
            .docs
            .keys()
            .chain(state.files.iter())
            .any(|known| known.as_str().starts_with(&prefix));
        is_dir.then_some(FileStat { is_directory: true })
    }

    fn get_containing_document(&self, uri: &Url) -> Option<ContainingDocument> {
        self.state
            .lock()
            .expect("workspace state poisoned")
            .containers
            .get(uri)
            .cloned()
    }

    fn get_workspace_folder(&self, _uri: &Url) -> Option<Url> {
        self.root.clone()
    }

    fn markdown_file_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn on_did_change_markdown_document(&self, listener: Listener<Document>) -> Subscription {
        self.changed.subscribe(listener)
    }

    fn on_did_create_markdown_document(&self, listener: Listener<Document>) -> Subscription {
        self.created.subscribe(listener)
    }

    fn on_did_delete_markdown_document(&self, listener: Listener<Url>) -> Subscription {
        self.deleted.subscribe(listener)
    }

    fn on_did_change_file(&self, listener: Listener<FileChange>) -> Subscription {
        self.file_changes.subscribe(listener)
    }
}
