//! Token sources: how a backend obtains a new OAuth2 token.

use std::future::Future;

use crate::cache::token::Token;
use crate::config::backends::OAuth2Params;
use crate::errors::TokenError;

pub mod oauth2;

pub use oauth2::ClientCredentialsFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::RefreshToken => "refresh_token",
        }
    }

    /// Refresh grant only when enabled and the old token can be refreshed.
    pub fn select(params: &OAuth2Params, old_token: Option<&Token>) -> GrantType {
        let refreshable = old_token
            .and_then(|t| t.refresh_token.as_deref())
            .is_some_and(|rt| !rt.is_empty());
        if params.use_refresh_token && refreshable {
            GrantType::RefreshToken
        } else {
            GrantType::ClientCredentials
        }
    }
}

pub trait TokenFetcher: Send + Sync {
    /// One call to the token endpoint. Never retries.
    fn fetch_token(
        &self,
        params: &OAuth2Params,
        old_token: Option<&Token>,
    ) -> impl Future<Output = Result<Token, TokenError>> + Send;
}
