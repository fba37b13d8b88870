pub mod channels;
pub mod config;
pub mod draft;
pub mod errors;
pub mod logging;
pub mod realtime;
pub mod session;
pub mod store;
pub mod ui;
pub mod webhook;
