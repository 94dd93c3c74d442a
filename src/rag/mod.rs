pub mod chunker;
pub mod embedding;
pub mod index;
pub mod persist;
pub mod registry;
