pub mod alignment;
pub mod approval;
pub mod grouping;
pub mod ingest;
pub mod loaders;
pub mod merge;
pub mod rules;
pub mod validate;
pub mod workflow;

pub use alignment::*;
pub use approval::*;
pub use grouping::*;
pub use ingest::*;
pub use loaders::*;
pub use merge::*;
pub use rules::*;
pub use validate::*;
pub use workflow::*;
