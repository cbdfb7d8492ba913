pub mod asset;
pub mod upload;
