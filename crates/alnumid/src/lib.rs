#![doc = include_str!("../README.md")]

mod allocator;
mod catalog;
mod context;
mod cursor;
mod digits;
mod engine;
mod error;
mod fs;
mod key;
mod persist;
mod quota;
mod resolve;
mod suffix;
mod time;
mod token;

pub use crate::allocator::*;
pub use crate::catalog::*;
pub use crate::context::*;
pub use crate::cursor::*;
pub use crate::digits::*;
pub use crate::engine::*;
pub use crate::error::*;
pub use crate::key::AllocationKey;
pub use crate::persist::*;
pub use crate::quota::*;
pub use crate::resolve::*;
pub use crate::suffix::*;
pub use crate::time::*;
pub use crate::token::*;
