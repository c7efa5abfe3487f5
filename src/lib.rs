//! Scan translation pipeline
//!
//! An ingestion API admits scanned document images; two worker pools connected
//! by Redis queues extract text, translate it, and render a translated PDF,
//! while a status store tracks every job's progress.

pub mod app_state;
pub mod config;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod workers;
