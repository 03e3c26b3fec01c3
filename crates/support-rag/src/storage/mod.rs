pub mod blob;
pub mod document_store;

pub use blob::{load_collection, save_collection, BlobStore, FileBlobStore, MemoryBlobStore};
pub use document_store::{append_keyword, DocumentStore, Retrievable};
