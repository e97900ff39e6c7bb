pub mod command_book;
pub mod config;
pub mod error;
pub mod input;
pub mod kernel;
pub mod logging;
pub mod resolver;
pub mod routine;
pub mod session;
pub mod vision;

pub use command_book::CommandBook;
pub use kernel::scheduler::ControlLoop;
pub use kernel::state::{SharedState, StateDelta};
pub use routine::ActionSequence;
pub use session::Session;
