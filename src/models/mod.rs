pub mod event;
pub mod secret;
pub mod service;
