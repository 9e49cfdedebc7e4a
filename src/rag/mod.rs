pub mod chunker;
pub mod format;
pub mod index;
pub mod registry;
pub mod retrieve;
pub mod search;
pub mod store;

pub use chunker::{chunk_paragraphs, chunk_text, chunk_words, ChunkStrategy};
pub use format::{format_hits_with_citations, join_context};
pub use index::{CollectionData, CollectionFiles, VectorIndex};
pub use registry::{normalize_key, CollectionMeta, Registry};
pub use retrieve::{merge_results, CollectionWarning, Retrieval, RetrievedChunk, Retriever};
pub use search::{dot_similarity, normalize, SearchResult};
pub use store::{CollectionStore, ConsistencyReport};
