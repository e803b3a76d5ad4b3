//! Back-end side of the link: accepts connections from the front-end, reads
//! one request at a time and answers each with exactly one response.

pub mod connection;
pub mod dispatcher;
pub mod server;

pub use dispatcher::{Dispatcher, Handler};
pub use server::Server;
