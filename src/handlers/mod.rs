pub mod bucket_handlers;
pub mod health_handlers;
pub mod transfer_handlers;
pub mod user_handlers;
