pub mod command_handler;
pub mod session;

pub use command_handler::{CommandHandler, CommandReply};
pub use session::ScanSession;
