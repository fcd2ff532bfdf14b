//! Declarative resource model

pub mod infrastructure;
pub mod machine;
pub mod machineset;
pub mod meta;
pub mod placement_group;
pub mod provider;

pub use infrastructure::*;
pub use machine::*;
pub use machineset::*;
pub use meta::*;
pub use placement_group::*;
pub use provider::*;
