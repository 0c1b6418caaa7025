//! Site diary domain: records, GraphQL operations, cached queries and the
//! create mutation.

mod client;
mod documents;
mod hooks;
pub mod keys;
mod mutation;
mod types;

pub use client::SiteDiaryClient;
pub use hooks::SiteDiaryApi;
pub use mutation::{CreateSiteDiary, MutationError};
pub use types::{CreateSiteDiaryInput, SiteDiary, Weather};
