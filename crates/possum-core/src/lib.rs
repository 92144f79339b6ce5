pub mod config;
pub mod error;
pub mod types;

pub use error::{CryptoError, PossumError, PossumResult};
pub use types::{
    BlockNonce, BlockRecord, BlockRef, ContentHash, FileInfo, FileRecord, SearchHit, TagKind,
    TagRecord,
};
