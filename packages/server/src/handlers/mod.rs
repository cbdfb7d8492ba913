pub mod asset;
pub mod serve;
pub mod upload;
