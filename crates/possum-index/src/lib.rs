//! possum-index: the searchable side of the catalog
//!
//! - `extract`: TF-IDF terms from a block's decoded plaintext
//! - `store`: file, block, and tag records behind the `MetadataStore` trait
//! - `search`: substring search over stored terms, grouped per block
//!
//! Terms are stored in plaintext next to encrypted content. Search reads only
//! the catalog and never touches ciphertext.

pub mod extract;
pub mod search;
pub mod store;
mod stopwords;

pub use extract::{decode_preview, excerpt, BlockAnalysis, ExtractedTag, TagExtractor};
pub use search::search;
pub use store::{JsonStore, MemoryStore, MetadataStore};
