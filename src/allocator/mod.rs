//! GPU memory and descriptor allocators.

pub mod buffer;
pub mod descriptor_pool;

pub use buffer::{BufferBlock, BufferSubAllocator, RangeTracker};
pub use descriptor_pool::{DescriptorPoolPool, PoolBudget};
