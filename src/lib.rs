pub mod api;
pub mod config;
pub mod humanize;
pub mod janitor;
pub mod jobs;
pub mod observability;
pub mod storage;
pub mod store;
pub mod worker;
