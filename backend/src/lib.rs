pub mod auth;
pub mod cipher;
pub mod config;
pub mod content;
pub mod error;
pub mod generate;
pub mod handlers;
pub mod http;
pub mod logs;
pub mod models;
pub mod render;
pub mod router;
pub mod upload;
pub mod utils;
