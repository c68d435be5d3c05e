//! Caller identification from the API key header
//!
//! Authentication proper belongs to the surrounding platform; this module
//! only maps a presented token to a [`Principal`].

use std::collections::{HashMap, HashSet};

use axum::http::HeaderMap;

use super::error::ApiError;
use crate::config::AuthConfig;
use crate::drivers::Principal;

pub const API_KEY_HEADER: &str = "X-Dataverse-key";

pub trait Authenticator: Send + Sync {
    /// Principal for `token`, or `None` when the token is not recognised.
    fn authenticate(&self, token: &str) -> Option<Principal>;
}

/// Static tokens from `[auth]`
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    superusers: HashSet<String>,
    users: HashMap<String, String>,
}

impl TokenAuthenticator {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            superusers: config.superuser_tokens.iter().cloned().collect(),
            users: config
                .user_tokens
                .iter()
                .map(|(token, name)| (token.clone(), name.clone()))
                .collect(),
        }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<Principal> {
        if self.superusers.contains(token) {
            return Some(Principal::Superuser);
        }
        self.users.get(token).cloned().map(Principal::User)
    }
}

/// No header means anonymous; an unknown key is rejected outright.
pub fn caller(authenticator: &dyn Authenticator, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let Some(value) = headers.get(API_KEY_HEADER) else {
        return Ok(Principal::Anonymous);
    };
    let token = value
        .to_str()
        .map_err(|_| ApiError::Unauthorized)?
        .trim();
    if token.is_empty() {
        return Ok(Principal::Anonymous);
    }
    authenticator.authenticate(token).ok_or(ApiError::Unauthorized)
}

/// File operations need some authenticated caller.
pub fn require_user(principal: &Principal) -> Result<(), ApiError> {
    match principal {
        Principal::Anonymous => Err(crate::Error::Permission(
            "this operation requires an API key".into(),
        )
        .into()),
        _ => Ok(()),
    }
}
