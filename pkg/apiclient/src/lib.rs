pub mod client;
pub mod memory;
pub mod resource;

pub use client::{ApiService, EventType, HttpApi, WireEvent, WireObject};
pub use memory::MemoryApi;
pub use resource::Resource;
