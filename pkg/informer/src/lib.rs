pub mod informer;
pub mod reflector;
pub mod store;
pub mod workqueue;

pub use informer::{EventHandler, Informer};
pub use reflector::{Delta, Reflector, ReflectorEvent};
pub use store::Store;
pub use workqueue::WorkQueue;
