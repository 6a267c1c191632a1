pub mod ops;
pub mod schema;

pub use ops::Store;
