//! Subcommand implementations.

pub mod health;
pub mod inspect;
pub mod repair;
pub mod serve;
