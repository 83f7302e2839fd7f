//! # Quip Drive Migrate
//!
//! Resumable batch migration of a Quip document tree into Google Drive.
//!
//! The migration runs as a sequence of independent passes over a local
//! mirror of the source tree. Each document and folder of the mirror carries
//! a JSON sidecar that records what has been done to it, so every pass can be
//! interrupted and re-run. Folder hierarchy, comments, authorship and links
//! between documents survive the move: links to Quip documents, folders and
//! users are rewritten to their Drive counterparts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  download  ┌──────────────┐  process  ┌──────────────┐  upload  ┌──────────┐
//! │   Quip   │──────────▶│ local mirror │─────────▶│ final files  │────────▶│  Drive   │
//! │ REST API │           │ + sidecars   │          │ links mapped │         │ REST API │
//! └──────────┘           └──────┬───────┘          └──────────────┘         └──────────┘
//!                               │ walk
//!                               ▼
//!                     ┌────────────────────┐
//!                     │ id mapping, report │
//!                     └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! qdm download-all          # structure, originals, exports, comments
//! qdm process-documents     # ids, comments, authors, links
//! qdm upload-all            # folders, files, shortcuts, manifest
//! qdm transfer-ownership    # hand files to their authors
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Sidecar data model |
//! | [`sidecar`] | Fingerprinted sidecar store |
//! | [`location`] | Sidecar locations and document variant paths |
//! | [`walker`] | Depth-first mirror traversal |
//! | [`progress`] | Progress labels and pass tallies |
//! | [`users`] | Source user directory |
//! | [`mapping`] | Source id to destination link mapping |
//! | [`resolve`] | Link resolution with suffix backtracking |
//! | [`ooxml`] | Hyperlink rewriting inside docx/xlsx archives |
//! | [`text_links`] | Hyperlink rewriting inside comment text |
//! | [`report`] | TSV reports |
//! | [`backoff`] | Retry of transient remote failures |
//! | [`quip`] | Source platform client |
//! | [`drive`] | Destination service client |
//! | [`context`] | Per-run state |
//! | [`download`] | Download passes |
//! | [`comments`] | Comment anchoring and insertion |
//! | [`authors`] | Author paragraphs |
//! | [`update_links`] | Link rewriting passes |
//! | [`upload`] | Id assignment, upload and ownership passes |
//! | [`manifest`] | Inventory reports |

pub mod authors;
pub mod backoff;
pub mod comments;
pub mod config;
pub mod context;
pub mod download;
pub mod drive;
pub mod error;
pub mod location;
pub mod manifest;
pub mod mapping;
pub mod models;
pub mod ooxml;
pub mod progress;
pub mod quip;
pub mod report;
pub mod resolve;
pub mod sidecar;
pub mod text_links;
pub mod update_links;
pub mod upload;
pub mod users;
pub mod walker;
