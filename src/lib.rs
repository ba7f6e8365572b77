pub mod config;
pub mod db;
pub mod error;
pub mod favorites;
pub mod handler;
pub mod model;
