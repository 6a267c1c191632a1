pub mod locator;
pub mod media_type;

pub use locator::Locator;
pub use media_type::MediaType;
