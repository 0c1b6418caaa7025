//! GraphQL-over-HTTP plumbing: the wire transport and its error taxonomy.

mod client;
mod error;

pub use client::{HttpTransport, Transport, MAX_TIMEOUT};
pub use error::{ErrorClass, FetchError, GraphQLErrorDetail};
