pub mod cache;
pub mod clean;
pub mod config;
pub mod error;
pub mod isbn;
pub mod lookup;

pub mod prelude {
    pub use crate::cache::{MemoryCache, MetadataCache};
    pub use crate::error::*;
    pub use crate::lookup::moly::MolySource;
    pub use crate::lookup::{IdentifyStatus, LookupOptions, MetadataRecord, MetadataSource, Query};
}
