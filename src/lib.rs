pub mod config;
pub mod environment;
pub mod exception;
pub mod factory;
pub mod filter;
pub mod message;
pub mod param;
pub mod query;
pub mod request;
pub mod response;
pub mod server_request;
pub mod stream;
pub mod uploaded_file;
pub mod uri;
pub mod util;

pub use config::Config;
pub use environment::{Environment, ServerParams, UploadedFiles};
pub use exception::{Exception, Result};
pub use factory::Factory;
pub use message::{HeaderBag, HttpMessage, Message};
pub use query::ParseStrOptions;
pub use request::{HttpRequest, Request, UriInput};
pub use response::Response;
pub use server_request::ServerRequest;
pub use stream::{Handle, Stream, StreamSource};
pub use uploaded_file::{FileMover, UploadError, UploadSource, UploadedFile, UploadedFileSpec};
pub use uri::Uri;
