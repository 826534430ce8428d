pub mod activity;
pub mod admin;
pub mod auth;
pub mod cart;
pub mod comments;
pub mod content;
pub mod coupons;
pub mod feed;
pub mod gifts;
pub mod live;
pub mod messaging;
pub mod moderation;
pub mod notifications;
pub mod orders;
pub mod recommendations;
pub mod stores;
pub mod users;
pub mod wallets;
