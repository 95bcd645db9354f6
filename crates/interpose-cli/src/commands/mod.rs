//! `interpose` subcommands.

pub mod demo;
pub mod info;
pub mod specs;
