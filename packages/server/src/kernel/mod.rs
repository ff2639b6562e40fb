//! Kernel module - run infrastructure shared by the HTTP server.

pub mod command_crawler;
pub mod session_hub;

pub use command_crawler::CommandCrawler;
pub use session_hub::SessionHub;
