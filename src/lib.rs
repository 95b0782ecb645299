pub mod broadcast;
pub mod config;
pub mod database;
pub mod error;
pub mod locks;
pub mod logs;
pub mod models;
pub mod routes;
pub mod service;
pub mod statistics;
pub mod table;
pub mod timestamp;
