mod log;
mod message;
mod node;
mod state;

pub use self::log::Log;
pub use message::{Address, Event, Message};
pub use node::{ClientHandle, Node, TICK_INTERVAL};
pub use state::StateMachine;
