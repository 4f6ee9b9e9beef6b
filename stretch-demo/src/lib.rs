pub mod error;
pub mod logging;
pub mod script_file;
pub mod signals;
