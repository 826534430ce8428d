//! Mixillo backend: short-video social network with shops, wallets,
//! live streaming and moderation.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
