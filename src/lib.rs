//! # rustscreen
//!
//! Systematic Review Screening Pipeline
//!
//! ## Modules
//!
//! - [`criteria`] - Screening criteria from text, Word or JSON documents
//! - [`bibtex`] - BibTeX ingestion into article records
//! - [`prompts`] - Generation prompt for the AI agent
//! - [`agent`] - Browser-driven screening logic generation
//! - [`logic`] - Screening strategies and the decision table interpreter
//! - [`screening`] - Batch screening and the results table
//! - [`config`] - Defaults, wait policy and browser options
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustscreen::{bibtex, criteria, logic::ReferenceStrategy, screening};
//! use std::path::Path;
//!
//! fn main() -> rustscreen::Result<()> {
//!     let criteria = criteria::parse_criteria(Path::new("criteria.txt"))?;
//!     let report = bibtex::parse_file(Path::new("articles.bib"))?;
//!     let strategy = ReferenceStrategy::new(criteria);
//!     let decisions = screening::screen_articles(&strategy, &report.records);
//!     screening::write_results(Path::new("screening_results.csv"), &decisions)?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod bibtex;
pub mod config;
pub mod criteria;
pub mod error;
pub mod logic;
pub mod prompts;
pub mod screening;

pub use error::{Result, ScreenError};
