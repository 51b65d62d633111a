//! CLI subcommands.

pub mod config;
pub mod init;
pub mod share;
pub mod track;
