// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! tidyfs: local file organizer
//!
//! Scans a subtree, finds duplicate content, applies user rules, merges them
//! with an external planner's proposal and executes the result with conflict
//! handling and a snapshot that can be reverted.

pub mod categories;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod executor;
pub mod guard;
pub mod hasher;
pub mod index;
pub mod plan;
pub mod planner;
pub mod progress;
pub mod rules;
pub mod scanner;
pub mod tree;

pub use config::AppConfig;
pub use error::{Result, TidyError};
