pub mod config;
pub mod error;
pub mod ffi;
pub mod redb;
pub mod store;
pub mod stream;
pub mod traits;

pub use config::{Location, MEMORY_LOCATION, StoreConfig};
pub use error::{KVError, describe};
pub use self::redb::RedbEngine;
pub use store::{Store, StoreCloser};
pub use stream::{Collect, Consumer};
pub use traits::StorageEngine;
