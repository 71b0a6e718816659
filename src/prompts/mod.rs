//! Prompt module for AI-agent operations.
//!
//! This module provides the prompt templates sent to the web-based AI agent.

pub mod screening_logic;

pub use screening_logic::*;
