pub mod compression;

pub use compression::{CompressionService, CompressionServiceImpl};
