pub mod jobs;
pub mod make;
pub mod processors;
pub mod provider;
