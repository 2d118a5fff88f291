use serde::{Deserialize, Serialize};

/// Identifier reported for connections holding an anonymous token.
pub const ANONYMOUS_IDENTIFIER: &str = "anon.";

/// Who a connection is, as far as the application is concerned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Identity {
    /// Plain identifier string (username, email, ...).
    Identifier(String),
    /// Opaque user record supplied by the authentication backend.
    User(serde_json::Value),
}

/// Credentials of an authenticated connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedToken {
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub user: Identity,
}

/// Result of authenticating a connection, cached per connection with a TTL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityToken {
    Authenticated(AuthenticatedToken),
    Anonymous,
}

impl IdentityToken {
    /// Authenticated token whose user reference is the username itself.
    pub fn authenticated(username: impl Into<String>, roles: Vec<String>) -> Self {
        let username = username.into();
        Self::Authenticated(AuthenticatedToken {
            user: Identity::Identifier(username.clone()),
            username,
            roles,
        })
    }

    /// Authenticated token carrying an opaque user record.
    pub fn with_user(username: impl Into<String>, roles: Vec<String>, user: serde_json::Value) -> Self {
        Self::Authenticated(AuthenticatedToken {
            username: username.into(),
            roles,
            user: Identity::User(user),
        })
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Authenticated(token) => Some(&token.username),
            Self::Anonymous => None,
        }
    }

    pub fn roles(&self) -> &[String] {
        match self {
            Self::Authenticated(token) => &token.roles,
            Self::Anonymous => &[],
        }
    }

    /// True when any of the token's roles appears in `roles`.
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.roles()
            .iter()
            .any(|own| roles.iter().any(|wanted| wanted.as_ref() == own))
    }

    /// Project the token onto the identity handed to application code.
    pub fn identity(&self) -> Identity {
        match self {
            Self::Authenticated(token) => token.user.clone(),
            Self::Anonymous => Identity::Identifier(ANONYMOUS_IDENTIFIER.to_string()),
        }
    }

    /// Short label for log lines.
    pub fn label(&self) -> &str {
        self.username().unwrap_or("anonymous")
    }
}
