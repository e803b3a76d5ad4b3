pub mod api;
pub mod models;

pub use api::{Request, RequestType, Response, ResponseCode, keys};
pub use models::{Session, User};
