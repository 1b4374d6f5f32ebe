pub mod backend;
pub mod content;
pub(crate) mod error_shapes;
pub mod messages;
