pub mod catalog;
pub mod handler;
pub mod logo_guard;
pub mod renderer;
pub mod resolver;
pub mod sanitize;
pub mod types;

pub use handler::create_og_router;
pub use resolver::resolve;
pub use types::{Layout, Pattern, RenderRequest, ResolvedConfig};
