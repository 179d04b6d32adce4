pub mod attrs;
pub mod builder;
pub mod error;
pub mod jid;
pub mod node;

pub use builder::NodeBuilder;
pub use error::BinaryError;
pub use node::{Attrs, Node, NodeContent};
