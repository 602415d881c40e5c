//! HTTP route handlers

pub mod api_keys;
pub mod auth;
pub mod chat;
pub mod export;
pub mod health;
pub mod repos;
