pub mod chat_controller;
pub mod composer;
pub mod dispatcher;
pub mod event_bus;
pub mod portal_api;
pub mod retry;
pub mod transport;
