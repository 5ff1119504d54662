pub mod service;
pub mod transport;

pub use service::{HelloService, ServiceError};
pub use transport::make_router;
