//! Core types and the lazy resolution engine for the Almanac directory layer.
//!
//! A [`User`] memoises what the directory knows about one person: their
//! preferences, the calendars, task lists and address books they own or can
//! reach, the mailboxes shared with them and their groups. Every memo is
//! filled on first use through the [`backend`] traits and cleared by the
//! mutations that could change it.
//!
//! This crate is deliberately free of database and CLI dependencies.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod backend;
pub mod cache;
pub mod collection;
pub mod config;
pub mod error;
pub mod group;
pub mod identity;
pub mod index;
pub mod memory;
pub mod preference;
pub mod resolver;
pub mod resource;
pub mod share;
pub mod slot;
pub mod user;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use slot::Slot;
pub use user::{Directory, User};
