use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use super::{
    dto::{AuthResponse, RefreshResponse},
    jwt::JwtKeys,
    password::{hash_password, verify_password},
};
use crate::{
    error::{ApiError, ApiResult},
    store::Store,
    users::model::User,
};

pub const MIN_PASSWORD_LEN: usize = 8;
const INVALID_CREDENTIALS: &str = "Invalid credentials";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

fn issue_pair(keys: &JwtKeys, user: User) -> ApiResult<AuthResponse> {
    let access_token = keys.sign_access(user.id, &user.email)?;
    let refresh_token = keys.sign_refresh(user.id, &user.email)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        token_type: "bearer".into(),
        user: user.into(),
    })
}

pub async fn register(
    store: &dyn Store,
    keys: &JwtKeys,
    email: Option<String>,
    password: Option<String>,
    full_name: Option<String>,
) -> ApiResult<AuthResponse> {
    let (Some(email), Some(password)) = (required(email), required(password)) else {
        return Err(ApiError::Validation("Email and password are required".into()));
    };
    let email = normalize_email(&email);

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if store.find_user_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let hash = hash_password(&password)?;
    let full_name = full_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    // a concurrent registration still trips the unique index -> DuplicateEmail -> 409
    let user = store
        .create_user(&email, &hash, full_name.as_deref())
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    issue_pair(keys, user)
}

pub async fn login(
    store: &dyn Store,
    keys: &JwtKeys,
    email: Option<String>,
    password: Option<String>,
) -> ApiResult<AuthResponse> {
    let (Some(email), Some(password)) = (required(email), required(password)) else {
        return Err(ApiError::Validation("Email and password are required".into()));
    };
    let email = normalize_email(&email);

    let Some(user) = store.find_user_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.into()));
    };

    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    info!(user_id = %user.id, "user logged in");
    issue_pair(keys, user)
}

pub async fn refresh(
    store: &dyn Store,
    keys: &JwtKeys,
    refresh_token: Option<String>,
) -> ApiResult<RefreshResponse> {
    let Some(token) = required(refresh_token) else {
        return Err(ApiError::Validation("Refresh token is required".into()));
    };
    let invalid = || ApiError::Unauthorized("Invalid refresh token".into());

    let claims = keys.verify_refresh(&token).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        invalid()
    })?;

    let Some(user) = store.find_user(claims.sub).await? else {
        warn!(user_id = %claims.sub, "refresh for deleted user");
        return Err(invalid());
    };

    let access_token = keys.sign_access(user.id, &user.email)?;
    Ok(RefreshResponse { access_token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{state::test_config, store::MemoryStore};

    fn keys() -> JwtKeys {
        JwtKeys::from(&test_config().jwt)
    }

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email(""));
        assert_eq!(normalize_email("  Foo@Bar.COM "), "foo@bar.com");
    }

    #[tokio::test]
    async fn register_rejects_short_password_and_missing_fields() {
        let store = MemoryStore::new();
        let err = register(&store, &keys(), s("a@example.com"), s("short"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = register(&store, &keys(), None, s("longenough"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_email_in_any_case_conflicts() {
        let store = MemoryStore::new();
        let keys = keys();
        register(&store, &keys, s("Dup@Example.com"), s("password1"), None)
            .await
            .unwrap();
        let err = register(&store, &keys, s("dup@EXAMPLE.com"), s("password2"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let store = MemoryStore::new();
        let keys = keys();
        register(&store, &keys, s("real@example.com"), s("password1"), None)
            .await
            .unwrap();

        let wrong = login(&store, &keys, s("real@example.com"), s("password2"))
            .await
            .unwrap_err();
        let unknown = login(&store, &keys, s("ghost@example.com"), s("password1"))
            .await
            .unwrap_err();
        assert!(matches!(wrong, ApiError::Unauthorized(_)));
        assert!(matches!(unknown, ApiError::Unauthorized(_)));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn refresh_issues_access_token_for_existing_user() {
        let store = MemoryStore::new();
        let keys = keys();
        let pair = register(&store, &keys, s("r@example.com"), s("password1"), s("R"))
            .await
            .unwrap();
        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.user.full_name.as_deref(), Some("R"));

        let res = refresh(&store, &keys, Some(pair.refresh_token.clone()))
            .await
            .unwrap();
        let claims = keys.verify_access(&res.access_token).unwrap();
        assert_eq!(claims.sub, pair.user.id);

        // access token is not accepted as a refresh token
        let err = refresh(&store, &keys, Some(pair.access_token)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        store.delete_user(pair.user.id).await.unwrap();
        let err = refresh(&store, &keys, Some(pair.refresh_token)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
