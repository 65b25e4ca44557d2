//! Social network real-time messaging server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod chat;
pub mod config;
pub mod db;
pub mod delivery;
pub mod groups;
pub mod notifications;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod ws;
