//! OAuth credential lifecycle: the token file, the token endpoint, the interactive consent flow and
//! the resolver that decides between them.

mod authorizer;
mod endpoint;
mod files;
mod listener;
mod resolver;
mod store;

pub(crate) use authorizer::{Authorizer, AuthorizerSettings, ConsolePresenter};
pub use endpoint::{EndpointError, TokenGrant};
pub(crate) use endpoint::{OAuthEndpoint, TokenEndpoint};
pub(crate) use files::{ClientMetadata, SecretFile};
pub use files::TokenFile;
pub(crate) use resolver::Resolver;
pub use resolver::{Resolution, Source};
pub(crate) use store::TokenStore;

#[cfg(test)]
pub(crate) use authorizer::Presenter;
#[cfg(test)]
pub(crate) use endpoint::CodeExchange;
