// src/lib.rs
pub mod ports {
    pub mod bot_api;
    pub mod http_api;
    #[cfg(test)]
    pub(crate) mod scripted_api;
}
pub mod config;
pub mod console;
pub mod controller;
pub mod sync;
