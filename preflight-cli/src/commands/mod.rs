//! CLI subcommands.

pub mod probe;
pub mod simulate;
