//! Generated credential secrets.
//!
//! Credentials live in Secrets with `username` and `password` keys. The
//! operator generates them once and reuses them on every later reconcile.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::registry::TrackedSet;
use super::store::StoreError;
use crate::admin::AdminCredentials;
use crate::constants::GENERATED_PASSWORD_LENGTH;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

fn value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone()).ok();
    }
    secret.string_data.as_ref().and_then(|d| d.get(key)).cloned()
}

/// Credentials stored in `secret`, if both keys are present
#[must_use]
pub fn from_secret(secret: &Secret) -> Option<AdminCredentials> {
    Some(AdminCredentials {
        username: value(secret, USERNAME_KEY)?,
        password: value(secret, PASSWORD_KEY)?,
    })
}

/// Write `credentials` into `secret`, keeping any other keys
pub fn store_in(secret: &mut Secret, credentials: &AdminCredentials) {
    let data = secret.data.get_or_insert_with(BTreeMap::new);
    data.insert(
        USERNAME_KEY.to_string(),
        ByteString(credentials.username.clone().into_bytes()),
    );
    data.insert(
        PASSWORD_KEY.to_string(),
        ByteString(credentials.password.clone().into_bytes()),
    );
    secret.type_ = Some("Opaque".to_string());
}

/// Load the credentials in secret `name`, generating and defining them when absent or incomplete
///
/// # Errors
///
/// Propagates store failures other than not-found.
pub async fn ensure(
    secrets: &mut TrackedSet<Secret>,
    name: &str,
    username: &str,
    metadata: impl FnOnce(ObjectMeta) -> ObjectMeta,
) -> Result<AdminCredentials, StoreError> {
    let existing = secrets.load_optional(name).await?;
    if let Some(credentials) = existing.as_ref().and_then(from_secret) {
        return Ok(credentials);
    }

    let credentials = AdminCredentials {
        username: username.to_string(),
        password: generate_password(),
    };
    let mut secret = existing.unwrap_or_default();
    secret.metadata = metadata(std::mem::take(&mut secret.metadata));
    store_in(&mut secret, &credentials);
    secrets.define(secret);
    Ok(credentials)
}

/// Load existing credentials; `Ok(None)` when the secret or its keys are missing
///
/// # Errors
///
/// Propagates store failures other than not-found.
pub async fn load(
    secrets: &mut TrackedSet<Secret>,
    name: &str,
) -> Result<Option<AdminCredentials>, StoreError> {
    Ok(secrets.load_optional(name).await?.as_ref().and_then(from_secret))
}
