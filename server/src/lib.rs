//! Marble race server library.
//!
//! This module exposes the server components for use in tests and binaries.

pub mod chat;
pub mod color;
pub mod config;
pub mod game_loop;
pub mod level;
pub mod persistence;
pub mod physics;
pub mod round;
pub mod score;
pub mod sync;
pub mod timers;
pub mod ws;
