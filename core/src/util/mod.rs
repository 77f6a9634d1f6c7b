pub mod chunk_ring;

pub use chunk_ring::ChunkRing;
