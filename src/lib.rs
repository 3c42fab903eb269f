//! tidesync: continuous one-way file synchronization over persistent TCP
//! connections, with resumable transfers and per-path single-writer
//! arbitration on the receiving side.

pub mod cli;
pub mod client;
pub mod codec;
pub mod compress;
pub mod config;
pub mod diff;
pub mod error;
pub mod logger;
pub mod net_async;
pub mod paths;
pub mod protocol;
pub mod server;
pub mod worker;
