//! Outbound collaborators for ragline.
//!
//! HTTP clients for the embedding and completion endpoints (any
//! OpenAI-compatible API), the vector store backends, and the retrying
//! clients the pipeline drives. [`factory`] wires them from configuration.

pub mod embedding;
pub mod factory;
pub mod memory_store;
pub mod openai_compat;
pub mod pinecone;
pub mod qdrant;
pub mod retriever;
pub mod streaming;

#[cfg(test)]
mod test_support;

pub use embedding::EmbeddingClient;
pub use factory::{RagClients, build_completion_provider, build_embedding_provider, build_vector_store};
pub use memory_store::{MemoryVectorStore, VectorRecord};
pub use openai_compat::{OpenAiCompatProvider, SseDecoder};
pub use pinecone::PineconeStore;
pub use qdrant::QdrantStore;
pub use retriever::VectorRetriever;
pub use streaming::{CompletionSettings, StreamingCompletionClient};
