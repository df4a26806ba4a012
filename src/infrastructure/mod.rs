pub mod auth;
pub mod backend_client;
pub mod config;
pub mod error;
pub mod event_mapper;
pub mod event_store;
pub mod logging;
pub mod storage;
pub mod subject_repository;
