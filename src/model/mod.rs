pub mod common;
pub mod group;
pub mod individual;
pub mod schema;
pub mod staging;
pub mod task;
pub mod upload;

pub use common::*;
pub use group::*;
pub use individual::*;
pub use schema::*;
pub use staging::*;
pub use task::*;
pub use upload::*;
