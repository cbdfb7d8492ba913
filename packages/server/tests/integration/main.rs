mod asset;
mod cascade;
mod common;
mod upload;
