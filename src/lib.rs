//! # RAG Client
//!
//! Client-side orchestration for a retrieval-augmented generation backend:
//! fingerprint a document, upload it with its fingerprint, then run a query
//! and render the streamed answer as it arrives.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐
//! │   File   │──▶│ Fingerprint │──▶│  Upload   │──▶ POST /upload
//! └──────────┘   └─────────────┘   └─────┬─────┘
//!                                        │ last fingerprint
//!                                        ▼
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐
//! │  Query   │──▶│   Search    │──▶│  Decode   │◀── POST /search (stream)
//! └──────────┘   └─────────────┘   └─────┬─────┘
//!                                        ▼
//!                                  ┌───────────┐
//!                                  │  Present  │──▶ view
//!                                  └───────────┘
//! ```
//!
//! Both machines publish immutable snapshots through a `watch` channel; a
//! view only ever reads the latest one. A new action supersedes the
//! in-flight action of the same kind, and the superseded action's late
//! results are discarded.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Failure taxonomy |
//! | [`fingerprint`] | Content digest |
//! | [`decode`] | Incremental UTF-8 decoding and normalization |
//! | [`epoch`] | Supersession of in-flight operations |
//! | [`state`] | Upload and search state machines |
//! | [`backend`] | Backend contract and HTTP implementation |
//! | [`upload`] | Upload coordinator |
//! | [`search`] | Query stream consumer |
//! | [`present`] | Keyword highlighting |
//! | [`session`] | Upload + search wired together |
//! | [`progress`] | Transition reporting on stderr |

pub mod backend;
pub mod config;
pub mod decode;
pub mod epoch;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod present;
pub mod progress;
pub mod search;
pub mod session;
pub mod state;
pub mod upload;
