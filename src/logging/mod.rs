pub mod request_id;
pub mod sanitization;
pub mod subscriber;

pub use request_id::*;
pub use sanitization::*;
pub use subscriber::*;
