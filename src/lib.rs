//! # offerforge
//!
//! An aggregation and indexation pipeline for heterogeneous product offers.
//!
//! offerforge takes raw product fragments scraped or fed from commercial
//! datasources and folds them into canonical product records keyed by
//! validated barcode. Attributes are aggregated with per-source conflict
//! tracking, prices are consolidated into live offers with history and
//! trends, media and categories are merged, and the resulting products are
//! batch-indexed into SQLite through bounded queues.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────────────────┐   ┌─────────────┐
//! │  Fragments  │──▶│       Aggregation          │──▶│ Indexation  │
//! │   (NDJSON)  │   │ identity → attrs → prices  │   │ queues +    │
//! └─────────────┘   │ → media → classification   │   │ bulk writes │
//!                   └───────────────────────────┘   └──────┬──────┘
//!                                                          │
//!                                                          ▼
//!                                                   ┌─────────────┐
//!                                                   │   SQLite    │
//!                                                   │ JSON + cols │
//!                                                   └──────┬──────┘
//!                                                          │
//!                                                          ▼
//!                                                   ┌─────────────┐
//!                                                   │     CLI     │
//!                                                   │  (oforge)   │
//!                                                   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! oforge init                          # create database
//! oforge ingest fragments.ndjson       # merge and index fragments
//! oforge get 4006381333931             # inspect one product
//! oforge export --sellable             # dump sellable products as NDJSON
//! oforge stats                         # database overview
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`barcode`] | Barcode validation and GS1 country detection |
//! | [`aggregator`] | Fragment merge orchestration |
//! | [`attributes`] | Attribute aggregation and indexed projection |
//! | [`prices`] | Offer consolidation, history, and trends |
//! | [`resources`] | Media merge and protected-URL filtering |
//! | [`taxonomy`] | Taxonomy resolution and vertical matching |
//! | [`indexation`] | Queued, batched product indexation |
//! | [`store`] | Product document store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod aggregator;
pub mod attributes;
pub mod barcode;
pub mod config;
pub mod db;
pub mod export;
pub mod get;
pub mod indexation;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod prices;
pub mod resources;
pub mod stats;
pub mod store;
pub mod taxonomy;
