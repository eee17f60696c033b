//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod parsers;
mod types;

#[cfg(test)]
mod tests;

pub use cli::{Command, CoordArgs, ServeArgs, WorkerArgs};
pub use types::{HttpMethod, PositiveU64, PositiveUsize};

pub(crate) use parsers::parse_header;
