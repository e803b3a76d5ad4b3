//! Front-end side of the link: a pool of framed connections to the back-end
//! and a request/response client on top of it.

pub mod client;
pub mod pool;

pub use client::{Client, ClientConfig, ClientError};
pub use pool::{Dial, Pool, PoolConfig, PoolError, PoolStats, Pooled, TcpDialer};
