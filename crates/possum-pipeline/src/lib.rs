//! possum-pipeline: the block pipeline over a blob store and a metadata catalog
//!
//! Upload: split → {hash → tag, encrypt, extract terms} per block → store
//! ciphertext → assemble → commit. Download and verification run the same
//! blocks back through checksum, decryption, and the pairing check.

pub mod assemble;
pub mod engine;
pub mod mime;

pub use assemble::{assemble, Assembly, ProcessedBlock};
pub use engine::{
    clear, download_file, file_info, search, upload_bytes, upload_file, verify_block,
    verify_file, verify_tags, BlockStatus, BlockVerdict, DownloadResult, PipelineContext,
    PipelineOptions, ProgressFn, UploadResult, VerifyMode, VerifyReport,
};
pub use mime::guess_mime;
