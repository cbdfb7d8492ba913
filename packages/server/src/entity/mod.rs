pub mod article;
pub mod comment;
pub mod reply;
pub mod user;
