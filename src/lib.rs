pub mod app;
pub mod blob;
pub mod cache;
pub mod columnar;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod http;
pub mod ingest;
pub mod observe;
pub mod output;
pub mod reshape;
pub mod store;
pub mod supervisor;
pub mod table;
pub mod transform;
pub mod validate;
pub mod warehouse;
