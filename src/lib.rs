#![forbid(unsafe_code)]

//! Shared building blocks for the `harvest_comments` binary: API access,
//! comment pagination, workbook output and the worker pool that ties them
//! together.

pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod workbook;
