pub mod etcd;
pub mod json;
pub mod memory;
pub mod types;

pub use etcd::EtcdMetaStore;
pub use json::{get_json, put_json};
pub use memory::MemoryMetaStore;
pub use types::{CasOutcome, MetaStore, Versioned};
