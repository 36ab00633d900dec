pub mod api_client;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod genai;
pub mod generations;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod users;
