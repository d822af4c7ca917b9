pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod dreams;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod routes;
pub mod webhooks;
