//! Newline-delimited TCP transport.
//!
//! Each line of UTF-8 text is one JSON request; each reply is one JSON
//! response followed by `\n`. Lines on a connection are dispatched
//! concurrently, so replies come back in completion order, not request
//! order. Clients correlate by `id`.
//!
//! - **Server**: accepts connections and feeds lines into an [`RpcDispatch`](crate::dispatch::RpcDispatch)
//! - **Client**: minimal line client, one call at a time

pub mod client;
pub mod server;

pub use client::TcpClient;
pub use server::{TcpOptions, TcpServer, TcpServerHandle};
