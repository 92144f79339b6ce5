//! possum-storage: OpenDAL blob store for encrypted blocks

pub mod blob;
pub mod health;
pub mod operator;

pub use blob::{block_key, object_url};
pub use health::{check_health, is_healthy};
pub use operator::{build_from_core_config, build_memory_operator, build_operator, S3Settings};
