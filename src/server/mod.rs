pub mod routes;
pub mod runtime;

pub use routes::AppState;
pub use runtime::{create_router, start_server};
