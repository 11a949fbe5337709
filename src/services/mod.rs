//! Storage backends and the pipelines built on top of them.

pub mod download_service;
pub mod listing;
pub mod local_store;
pub mod object_store;
pub mod s3_store;
pub mod staging;
pub mod upload_service;
pub mod user_store;
