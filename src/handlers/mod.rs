pub mod health_handlers;
pub mod media_handlers;
pub mod object_handlers;
