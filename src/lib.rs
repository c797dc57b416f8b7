#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod bits;
mod config;
mod error;
mod fib;
mod handle;
mod hazard;
mod iter;
mod key;
mod loom;
mod node;
mod reclaim;
mod table;

pub use config::FibConfig;
pub use fib::Fib;
pub use handle::Handle;
pub use iter::{FibCursor, Walker};
pub use key::{AddressFamily, FibKey, Ipv4Prefix, Ipv6Prefix, RoutableKey};
