//! HTTP handlers grouped by domain; each module exposes a `router()` that is
//! merged under `/api`.

pub mod admin;
pub mod auth;
pub mod cart;
pub mod content;
pub mod feed;
pub mod gifts;
pub mod live;
pub mod messaging;
pub mod moderation;
pub mod notifications;
pub mod orders;
pub mod stores;
pub mod users;
pub mod wallets;
