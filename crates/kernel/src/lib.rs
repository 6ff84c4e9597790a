//! Quill Kernel Library
//!
//! Plugin discovery, lifecycle, and configuration services. The `quill`
//! binary wraps these in an operator CLI.

pub mod config;
pub mod db;
pub mod plugin;
