pub mod app_error;
pub mod app_state;
pub mod bootstrap;
pub mod care;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod routes;
pub mod schema;
pub mod shutdown;
pub mod store;
