//! # nl2mongo
//!
//! Translate natural-language requests into MongoDB operations and run them.
//!
//! A language model turns the request into a shell-style command such as
//! `db.users.find({name: 'John'})`. This crate does the rest: it classifies the
//! command, repairs near-JSON arguments, validates them per operation, runs the
//! operation against a document store and returns a JSON-safe result.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │ Generator  │──▶│ Matcher │──▶│ Normalizer│──▶│ Dispatcher │──▶│  Store   │
//! │ OpenAI/    │   │ db.x()  │   │ JSON +    │   │ per-op     │   │ MongoDB/ │
//! │ Ollama     │   │ db.c.x()│   │ repair    │   │ validation │   │ memory   │
//! └────────────┘   └─────────┘   └───────────┘   └────────────┘   └──────────┘
//!        ▲                                                             │
//!        │                  ResponseEnvelope ◀──────────────────────────┘
//!   ┌────┴─────┐
//!   │ CLI/HTTP │
//!   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`normalize`] | Argument decoding and repair, top-level splitting |
//! | [`matcher`] | Command shape classification |
//! | [`dispatch`] | Operation dispatch and result sanitization |
//! | [`store`] | Document store trait, MongoDB and in-memory backends |
//! | [`generator`] | Text generator trait, OpenAI and Ollama backends |
//! | [`translate`] | Request pipeline and response envelope |
//! | [`server`] | HTTP server |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod logging;
pub mod matcher;
pub mod normalize;
pub mod server;
pub mod store;
pub mod translate;
