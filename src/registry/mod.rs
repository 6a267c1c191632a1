pub mod assembly;
pub mod scheme;

pub use assembly::{Assembly, AssemblyRegistry, CloneAction, Instruction};
pub use scheme::{BaseLocation, SchemeCapability, SchemeOptions, SchemeRegistry};
