//! Types shared between the marble race server and its clients.

pub mod config;
pub mod protocol;
