//! Courier
//!
//! An asynchronous HTTP/1.1 client engine with pooled connections.
//!
//! Requests are submitted through a cheap [`Client`] handle and resolve
//! through [`ResponseHandle`]s that outlive the handle itself: dropping the
//! client never cancels work already in flight. Connections are reused
//! through a destination-keyed pool, requests can be dispatched in strict
//! per-connection submission order or fully concurrently, and a configured
//! timeout bounds both the wait for response headers and every body-read
//! stall. Failures arrive asynchronously, classified into a small fixed
//! [`ErrorKind`] taxonomy.

pub mod body;
pub mod client;
pub mod error;

pub use body::{Body, ResponseBody};
pub use client::pool::Config as PoolConfig;
pub use client::{Builder, Client, Config, Response, ResponseHandle};
pub use error::{Error, ErrorKind};
