pub mod auth;
pub mod cache;
pub mod conditional;
pub mod config;
pub mod cors;
pub mod exception;
pub mod negotiate;
pub mod param;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod store;
pub mod util;

pub use auth::{AuthGuard, CredentialVerifier, Credentials};
pub use cache::ContentCache;
pub use config::{AuthScheme, Config};
pub use cors::CorsFilter;
pub use exception::{Exception, HttpException};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::{Accept, Request, RequestContext};
pub use response::Response;
pub use router::{handler, Handled, Handler, Router};
pub use server::{key_value_routes, Server};
pub use store::ResourceStore;
