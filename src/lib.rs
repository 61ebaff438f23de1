pub mod api;
pub mod browser;
pub mod chromium;
pub mod config;
pub mod engine;
pub mod extract;
pub mod notifications;
pub mod sites;
pub mod stealth;
pub mod visitors;
