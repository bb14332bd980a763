pub mod client;
pub mod routes;

pub use client::HttpTransport;
pub use routes::router;
