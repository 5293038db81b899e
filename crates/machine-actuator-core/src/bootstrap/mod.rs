//! Bootstrap token issuer
//!
//! Worker machines join the cluster with a short-lived bootstrap token. A
//! token is `<id>.<secret>`, where the id is 6 and the secret 16 characters
//! of `[a-z0-9]`. The cluster learns about the token through a secret in
//! `kube-system`, which this module builds and persists.

use crate::error::{Error, Result};
use crate::traits::{Secret, SecretStore};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use tracing::info;

/// Namespace bootstrap token secrets live in
pub const TOKEN_SECRET_NAMESPACE: &str = "kube-system";
/// Prefix of a bootstrap token secret's name
pub const TOKEN_SECRET_PREFIX: &str = "bootstrap-token-";
/// Secret type marking bootstrap tokens
pub const TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";

pub const TOKEN_ID_KEY: &str = "token-id";
pub const TOKEN_SECRET_KEY: &str = "token-secret";
pub const EXPIRATION_KEY: &str = "expiration";
pub const USAGE_AUTHENTICATION_KEY: &str = "usage-bootstrap-authentication";
pub const USAGE_SIGNING_KEY: &str = "usage-bootstrap-signing";
pub const EXTRA_GROUPS_KEY: &str = "auth-extra-groups";
pub const DESCRIPTION_KEY: &str = "description";

/// Group granted to nodes joining with the token
pub const DEFAULT_NODE_GROUP: &str = "system:bootstrappers:kubeadm:default-node-token";

const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;
const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A bootstrap token
///
/// `Debug` never prints the secret half.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    id: String,
    secret: String,
}

impl BootstrapToken {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        Self {
            id: random_string(TOKEN_ID_LEN),
            secret: random_string(TOKEN_SECRET_LEN),
        }
    }

    /// Parse `<id>.<secret>`, `None` if the format is wrong
    pub fn parse(raw: &str) -> Option<Self> {
        let (id, secret) = raw.split_once('.')?;
        if !is_token_part(id, TOKEN_ID_LEN) || !is_token_part(secret, TOKEN_SECRET_LEN) {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The token as handed to joining nodes: `<id>.<secret>`
    pub fn expose(&self) -> String {
        format!("{}.{}", self.id, self.secret)
    }
}

impl std::fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapToken")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

fn is_token_part(part: &str, len: usize) -> bool {
    part.len() == len && part.bytes().all(|b| TOKEN_CHARSET.contains(&b))
}

/// Build the secret announcing `token` to the cluster
///
/// A malformed token is a programming error and yields the fatal
/// [`Error::InvariantViolated`].
pub fn token_secret(token: &str, expiration: DateTime<Utc>) -> Result<Secret> {
    let token = BootstrapToken::parse(token)
        .ok_or_else(|| Error::invariant("generated bootstrap token has an invalid format"))?;

    let secret = Secret::new(
        TOKEN_SECRET_NAMESPACE,
        format!("{}{}", TOKEN_SECRET_PREFIX, token.id()),
    )
    .with_data(TOKEN_ID_KEY, token.id())
    .with_data(TOKEN_SECRET_KEY, token.secret())
    .with_data(
        EXPIRATION_KEY,
        expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
    .with_data(USAGE_AUTHENTICATION_KEY, "true")
    .with_data(USAGE_SIGNING_KEY, "true")
    .with_data(EXTRA_GROUPS_KEY, DEFAULT_NODE_GROUP)
    .with_data(
        DESCRIPTION_KEY,
        "Bootstrap token generated by the machine actuator",
    );

    Ok(Secret {
        secret_type: TOKEN_SECRET_TYPE.to_string(),
        ..secret
    })
}

/// Mint a token valid for `ttl`, persist its secret and return `<id>.<secret>`
///
/// A persistence failure is returned as-is; nothing is retried here.
pub async fn issue(secrets: &dyn SecretStore, ttl: chrono::Duration) -> Result<String> {
    let token = BootstrapToken::generate();
    let expiration = Utc::now() + ttl;
    let secret = token_secret(&token.expose(), expiration)?;

    secrets.create(&secret).await?;
    info!(token_id = %token.id(), expiration = %expiration, "Created bootstrap token");

    Ok(token.expose())
}
