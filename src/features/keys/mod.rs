pub mod handler;
pub mod session;

pub use handler::create_keys_router;
