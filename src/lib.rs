pub mod backend;
pub mod constants;
pub mod logging;
pub mod markdown;
pub mod providers;
pub mod session;
pub mod settings;
pub mod sse;
pub mod str_utils;
pub mod transcript;
pub mod tui;
pub mod types;

pub use types::*;
