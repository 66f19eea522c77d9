pub mod handler;

pub use handler::create_waitlist_router;
