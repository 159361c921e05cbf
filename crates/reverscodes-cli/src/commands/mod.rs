pub mod comments;
pub mod config;
pub mod gate;
