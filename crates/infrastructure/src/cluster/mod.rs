pub mod node_directory;

pub use node_directory::{DatabaseNodeDirectory, StaticNodeDirectory};
