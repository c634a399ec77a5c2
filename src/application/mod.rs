//! Request-facing services: filters, search strategies and cached read paths.

pub mod error;
pub mod filters;
pub mod pagination;
pub mod repos;
pub mod response;
pub mod search;
pub mod tenders;
