//! Shared test utilities for mdnav.
//!
//! This module provides counting collaborator doubles used across multiple
//! test modules. It is only compiled when running tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tower_lsp::async_trait;
use tower_lsp::lsp_types::Url;

use crate::document::Document;
use crate::event::{Listener, Subscription};
use crate::tokenize::{BlockTokenizer, Token, Tokenizer};
use crate::workspace::{ContainingDocument, FileChange, FileStat, InMemoryWorkspace, Workspace};

/// A tokenizer that counts invocations, for cache-idempotence assertions.
pub struct CountingTokenizer {
    inner: BlockTokenizer,
    calls: AtomicUsize,
}

impl CountingTokenizer {
    pub fn new() -> CountingTokenizer {
        CountingTokenizer {
            inner: BlockTokenizer,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tokenizer for CountingTokenizer {
    fn tokenize(&self, doc: &Document) -> Vec<Token> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.tokenize(doc)
    }
}

/// A workspace that delegates to an [`InMemoryWorkspace`] while counting
/// stat probes, for incremental-diagnostics assertions.
pub struct CountingWorkspace {
    inner: Arc<InMemoryWorkspace>,
    stat_calls: AtomicUsize,
}

impl CountingWorkspace {
    pub fn new(inner: Arc<InMemoryWorkspace>) -> CountingWorkspace {
        CountingWorkspace {
            inner,
            stat_calls: AtomicUsize::new(0),
        }
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Workspace for CountingWorkspace {
    async fn open_markdown_document(&self, uri: &Url) -> Option<Document> {
        self.inner.open_markdown_document(uri).await
    }

    async fn get_all_markdown_documents(&self) -> Vec<Document> {
        self.inner.get_all_markdown_documents().await
    }

    async fn stat(&self, uri: &Url) -> Option<FileStat> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.stat(uri).await
    }

    fn get_containing_document(&self, uri: &Url) -> Option<ContainingDocument> {
        self.inner.get_containing_document(uri)
    }

    fn get_workspace_folder(&self, uri: &Url) -> Option<Url> {
        self.inner.get_workspace_folder(uri)
    }

    fn markdown_file_extensions(&self) -> &[String] {
        self.inner.markdown_file_extensions()
    }

    fn on_did_change_markdown_document(&self, listener: Listener<Document>) -> Subscription {
        self.inner.on_did_change_markdown_document(listener)
    }

    fn on_did_create_markdown_document(&self, listener: Listener<Document>) -> Subscription {
        self.inner.on_did_create_markdown_document(listener)
    }

    fn on_did_delete_markdown_document(&self, listener: Listener<Url>) -> Subscription {
        self.inner.on_did_delete_markdown_document(listener)
    }

    fn on_did_change_file(&self, listener: Listener<FileChange>) -> Subscription {
        self.inner.on_did_change_file(listener)
    }
}
