//! Gamiforge: Bounded-Concurrency Generation Backend
//!
//! Fans out remote generation jobs (LLM text, vision, image, audio) under
//! per-kind concurrency caps, chains dependent jobs through strict and
//! soft-wait edges, and merges results into persisted game state without
//! losing completed analyses.
//!
//! The core is [`job`], [`dispatch`], [`batch`], [`pipeline`] and [`merge`];
//! [`generation`] builds the game flows on top of it.

pub mod batch;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generation;
pub mod job;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod store;
