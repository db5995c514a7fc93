//! # Session Warehouse
//!
//! Turns raw chat-log exports into rows of an analytical star schema.
//!
//! An upload is fingerprinted while it is spooled to disk, checked against
//! the ingestion ledger, cut into conversation sessions on inactivity gaps,
//! enriched session by session through an external collaborator (in
//! parallel, with retries), reassembled in session order, and loaded into
//! SQLite in a single transaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌────────────┐   ┌───────────┐
//! │  Upload  │──▶│ Sessionize │──▶│ Enrichment │──▶│ Assembler │
//! │ +ledger  │   │  +redact   │   │    pool    │   │ (ordered) │
//! └──────────┘   └────────────┘   └────────────┘   └─────┬─────┘
//!                                                        ▼
//!                ┌──────────┐       ┌──────────┐   ┌───────────┐
//!                │   CLI    │       │   HTTP   │◀──│ Warehouse │
//!                │  (swh)   │       │  (axum)  │   │  (SQLite) │
//!                └──────────┘       └──────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! swh init                      # create database
//! swh ingest export.json        # process one upload
//! swh stats                     # summary of loaded sessions
//! swh serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Messages, sessions and enriched records |
//! | [`redact`] | Phone and email masking |
//! | [`sessionize`] | Gap-based session splitting |
//! | [`upload`] | Spooling, fingerprinting, format check |
//! | [`ledger`] | Processed-upload fingerprints |
//! | [`enrich`] | Enrichment collaborator trait and subprocess implementation |
//! | [`pool`] | Concurrent enrichment with retry and fail-fast |
//! | [`assemble`] | Ordered streaming of out-of-order results |
//! | [`json_stream`] | Lazy JSON array reader |
//! | [`warehouse`] | Idempotent star-schema loader |
//! | [`pipeline`] | End-to-end batch orchestration |
//! | [`dashboard`] | Aggregate queries |
//! | [`server`] | HTTP API |
//! | [`error`] | Typed ingestion errors |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod assemble;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod enrich;
pub mod error;
pub mod json_stream;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod redact;
pub mod server;
pub mod sessionize;
pub mod upload;
pub mod warehouse;
