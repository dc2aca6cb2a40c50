pub mod config;
pub mod conversation;
pub mod drive_command;
pub mod frame;
pub mod motion;

pub use config::*;
pub use conversation::*;
pub use drive_command::*;
pub use frame::*;
pub use motion::*;
