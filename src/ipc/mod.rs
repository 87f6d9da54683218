//! IPC module for daemon-GUI communication

mod protocol;
mod server;

pub use protocol::{Notification, Request, Response, SessionStatus, MAX_MESSAGE_LEN};
pub use server::Server;
