pub mod check;
pub mod cli;
pub mod probe;

pub use check::*;
pub use cli::*;
pub use probe::*;
