pub mod aggregate;
pub mod app;
pub mod classifier;
pub mod classify;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fs_util;
pub mod locate;
pub mod manifest;
pub mod output;
pub mod record;
pub mod repackage;
pub mod resolve;
pub mod upload;
pub mod workspace;
