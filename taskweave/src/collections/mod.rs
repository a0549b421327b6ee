//! Lock-free collections shared between tasks.

mod stack;
pub use stack::ConcurrentStack;
