//! The default scheduler: a fixed pool of worker threads with work stealing.
//!
//! Each worker owns a LIFO local queue. Tasks queued from a worker thread go
//! to that worker's local queue, other tasks go to a shared FIFO injector.
//! Idle workers steal from the injector and from their peers, then park.

mod builder;
pub use builder::Builder;
pub(crate) use builder::PoolConfig;

mod pool;
pub use pool::ThreadPool;

mod shared;
use shared::Shared;

mod ticker;
use ticker::{Ticker, TickerData, TickerEvents};

mod worker;
use worker::Worker;

#[cfg(test)]
mod tests;
