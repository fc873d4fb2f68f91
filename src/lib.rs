//! Kino Bot Library
//!
//! A Telegram bot serving a media catalog to its users.
//!
//! This crate provides the core functionality for:
//! - Throttling interactive user actions with a fixed-window rate gate
//! - Keeping a directory of users and selecting broadcast recipients
//! - Broadcasting a message to many users at a paced, fixed cadence
//! - Handling user and admin commands via chat messages

pub mod broadcast;
pub mod commands;
pub mod config;
pub mod directory;
pub mod gate;
pub mod identity;
pub mod notify;
mod persist;
pub mod runtime;
pub mod telegram;
