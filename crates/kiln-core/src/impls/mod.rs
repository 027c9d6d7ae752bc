//! In-memory/demo implementations of the ports, for development and tests.

pub mod demo_sealer;
pub mod memory_blobs;
pub mod memory_pipeline;
pub mod memory_store;
pub mod static_chain;

pub use demo_sealer::DemoSealer;
pub use memory_blobs::InMemoryBlobStore;
pub use memory_pipeline::InMemoryPipelineStore;
pub use memory_store::InMemoryTaskStore;
pub use static_chain::StaticChain;
