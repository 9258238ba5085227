pub mod flow;
pub mod server;
pub mod shared;
pub mod store;
pub mod whatsapp;
