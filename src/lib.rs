//! mdnav: cross-file link intelligence for markdown workspaces.
//!
//! This crate is the link/reference resolution and incremental diagnostics
//! engine of a markdown language tool, designed to be embedded in any
//! editing surface.
//!
//! # Overview
//!
//! - **Link extraction**: every link-like construct in a document — inline,
//!   reference-style, autolink, definition — with byte-accurate spans and
//!   classified targets ([`links`])
//! - **Outlines**: per-document tables of contents with stable,
//!   collision-disambiguated heading anchors ([`toc`])
//! - **Two-phase navigation**: protocol link records with deferred internal
//!   target resolution ([`document_links`])
//! - **Validation**: file, fragment, and reference diagnostics with an
//!   incremental manager that re-probes the filesystem only when a touched
//!   path actually changed ([`diagnostics`])
//! - **Caching**: lazily-computed, awaitable per-document and per-workspace
//!   caches invalidated purely by workspace notifications ([`cache`])
//!
//! # Architecture
//!
//! The engine consumes three collaborator interfaces: a [`workspace::Workspace`]
//! (documents, stat, notifications), a [`tokenize::Tokenizer`] (block token
//! stream), and a [`slug::Slugifier`] (anchor generation). Built-in
//! implementations of all three ship with the crate, so it works end to end
//! out of the box:
//!
//! ```ignore
//! use std::sync::Arc;
//! use mdnav::config::Settings;
//! use mdnav::diagnostics::{DiagnosticsComputer, DiagnosticsManager};
//! use mdnav::document_links::LinkProvider;
//! use mdnav::slug::GithubSlugifier;
//! use mdnav::toc::TocProvider;
//! use mdnav::tokenize::{BlockTokenizer, Tokenizer};
//! use mdnav::workspace::InMemoryWorkspace;
//!
//! let workspace = Arc::new(InMemoryWorkspace::from_root(&root_dir)?);
//! let tokenizer: Arc<dyn Tokenizer> = Arc::new(BlockTokenizer);
//! let toc = Arc::new(TocProvider::new(tokenizer.clone(), Arc::new(GithubSlugifier), workspace.clone()));
//! let links = Arc::new(LinkProvider::new(tokenizer, workspace.clone(), toc.clone()));
//! let computer = Arc::new(DiagnosticsComputer::new(workspace.clone(), links, toc));
//! let manager = DiagnosticsManager::new(&*workspace, computer);
//! ```

// Core data model
pub mod document;
pub mod links;
pub mod toc;

// Engine features
pub mod diagnostics;
pub mod document_links;

// Caching and lifecycle
pub mod cache;
pub mod cancel;
pub mod event;

// Collaborator boundaries and built-in implementations
pub mod slug;
pub mod tokenize;
pub mod workspace;

// Configuration
pub mod config;

// Test utilities (only available in test builds)
#[cfg(test)]
pub mod test_utils;
