pub mod setup;

pub use setup::initialize;
