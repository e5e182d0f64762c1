pub mod collection;
pub mod memory;

pub use collection::{Collection, UpdateOptions, UpdateResult};
pub use memory::{CollectionCall, RecordingCollection};
