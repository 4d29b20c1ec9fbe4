pub mod error;
pub mod output;

pub use error::{classify_command_failure, ExecuteError};
pub use output::cap_stream;
