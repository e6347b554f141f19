pub mod cli;
pub mod matrix_io;

pub use cli::{Cli, Commands};
