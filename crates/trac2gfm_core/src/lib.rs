pub mod cache;
pub mod config;
pub mod github;
pub mod markup;
pub mod migrate;
pub mod trac;
