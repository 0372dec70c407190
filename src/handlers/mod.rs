pub mod cleanup_handlers;
pub mod health_handlers;
