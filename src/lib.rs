//! Cache-aware query serving for government tender listings.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
