pub mod lru;

pub use lru::LruList;
