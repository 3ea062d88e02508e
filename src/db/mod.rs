pub mod models;
pub mod sqlite_service;
