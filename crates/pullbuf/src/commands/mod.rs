pub mod config;
pub mod pull;
pub mod serve;
