pub mod headers;
pub mod message;
pub mod response;

pub use headers::{HeaderCode, HttpHeaders};
pub use message::{HttpMessage, Method};
pub use response::HttpResponse;
