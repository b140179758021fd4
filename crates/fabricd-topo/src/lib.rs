pub mod error;
pub mod memory;
pub mod object;
pub mod store;

pub use error::{TopoError, WatchError};
pub use memory::InMemoryTopoStore;
pub use object::{EventKind, ObjectKind, RealmFilter, TopoEvent, TopoObject};
pub use store::{TopoStore, TopoWatch};
