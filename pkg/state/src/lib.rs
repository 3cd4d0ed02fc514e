pub mod client;
pub mod error;
pub mod retry;
pub mod watch;
