//! Store factory and memory manager.
//!
//! [`StoreFactory`] turns a backend kind and configuration map into an
//! uninitialized backend; [`MemoryManager`] registers backends, routes writes
//! by [`MemoryType`](memory_primitives::MemoryType) and merges fan-out reads.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod factory;
mod manager;
mod registry;

pub use error::{ManagerError, ManagerResult};
pub use factory::StoreFactory;
pub use manager::{ClearScope, MemoryManager, StoreOptions};
pub use registry::{StoreHandle, StoreRegistry, default_type_mapping};
