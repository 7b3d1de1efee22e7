use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::credentials::{hash_admin_password, verify_admin_password, CredentialStore};
use crate::models::{Admin, StudentAccount};
use crate::{breaks, creates, proceeds, Error, Payload};

const TOKEN_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct TokenKeys {
    secret: String,
}

impl TokenKeys {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Admin,
    Student,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(keys: &TokenKeys, id: &str, user_type: UserType) -> Result<String, Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        id: id.to_string(),
        user_type,
        iat: now,
        exp: now + TOKEN_TTL_SECONDS,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(keys.secret.as_bytes()),
    )
    .map_err(|err| Error::InternalError {
        kind: "TokenError",
        message: err.to_string(),
    })
}

pub fn verify_token(keys: &TokenKeys, token: &str) -> Result<Claims, Error> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(keys.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => Error::AuthenticationFailure {
            message: "Token has expired".to_string(),
        },
        _ => Error::AuthenticationFailure {
            message: "Invalid token".to_string(),
        },
    })
}

pub fn authenticate(headers: &HeaderMap, keys: &TokenKeys) -> Result<Claims, Error> {
    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Error::AuthenticationFailure {
            message: "Missing authorization header".to_string(),
        })?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
    verify_token(keys, token)
}

pub fn require_admin(claims: &Claims) -> Result<(), Error> {
    if claims.user_type != UserType::Admin {
        return Err(Error::AuthenticationFailure {
            message: "Admin access required".to_string(),
        });
    }
    Ok(())
}

pub async fn login(
    Json(login): Json<LoginRequest>,
    Extension(pool): Extension<SqlitePool>,
    Extension(credentials): Extension<CredentialStore>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<LoggedIn> {
    if login.username.is_empty() || login.password.is_empty() {
        return breaks(Error::MissingCredentials {
            message: "`username` and `password` are required".to_string(),
        });
    }

    let admin = sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE username = ? LIMIT 1")
        .bind(&login.username)
        .fetch_optional(&pool)
        .await
        .map_err(Error::from)?;

    if let Some(admin) = admin {
        if !verify_admin_password(&login.password, &admin.password_hash)? {
            return breaks(Error::AuthenticationFailure {
                message: "Invalid credentials".to_string(),
            });
        }
        let token = issue_token(&keys, &admin.id.to_string(), UserType::Admin)?;
        return proceeds(LoggedIn {
            token,
            user_type: UserType::Admin,
            student_id: None,
        });
    }

    let account = sqlx::query_as::<_, StudentAccount>(
        "SELECT * FROM student_accounts WHERE username = ? LIMIT 1",
    )
    .bind(&login.username)
    .fetch_optional(&pool)
    .await
    .map_err(Error::from)?;

    let account = if let Some(account) = account {
        account
    } else {
        return breaks(Error::AuthenticationFailure {
            message: "Invalid credentials".to_string(),
        });
    };

    let plaintext = credentials.decrypt(&account.password).map_err(Error::from)?;
    if plaintext != login.password {
        return breaks(Error::AuthenticationFailure {
            message: "Invalid credentials".to_string(),
        });
    }

    let token = issue_token(&keys, &account.student_id, UserType::Student)?;
    proceeds(LoggedIn {
        token,
        user_type: UserType::Student,
        student_id: Some(account.student_id),
    })
}

pub async fn register_admin(
    Json(body): Json<RegisterAdminRequest>,
    Extension(pool): Extension<SqlitePool>,
) -> Payload<AdminRegistered> {
    if body.username.is_empty() || body.password.is_empty() {
        return breaks(Error::MissingCredentials {
            message: "`username` and `password` are required".to_string(),
        });
    }

    let existing = sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE username = ? LIMIT 1")
        .bind(&body.username)
        .fetch_optional(&pool)
        .await
        .map_err(Error::from)?;
    if existing.is_some() {
        return breaks(Error::AdminAlreadyExists {
            message: "Username is already taken".to_string(),
        });
    }

    let password_hash = hash_admin_password(&body.password)?;
    sqlx::query("INSERT INTO admins (username, password_hash, created_at) VALUES (?, ?, ?)")
        .bind(&body.username)
        .bind(&password_hash)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .map_err(Error::from)?;

    creates(AdminRegistered {
        message: "Admin registered successfully".to_string(),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedIn {
    token: String,
    user_type: UserType,
    #[serde(skip_serializing_if = "Option::is_none")]
    student_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAdminRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminRegistered {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> TokenKeys {
        TokenKeys::new("unit-test-jwt-secret".to_string())
    }

    #[test]
    fn token_round_trips() {
        let keys = test_keys();
        let token = issue_token(&keys, "2023-0001", UserType::Student).unwrap();
        let claims = verify_token(&keys, &token).unwrap();
        assert_eq!(claims.id, "2023-0001");
        assert_eq!(claims.user_type, UserType::Student);
        assert_eq!(claims.exp, claims.iat + TOKEN_TTL_SECONDS);
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = issue_token(&test_keys(), "1", UserType::Admin).unwrap();
        let other = TokenKeys::new("some-other-secret".to_string());
        let result = verify_token(&other, &token);
        assert!(matches!(result, Err(Error::AuthenticationFailure { .. })));
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = test_keys();
        let now = Utc::now().timestamp();
        let claims = Claims {
            id: "1".to_string(),
            user_type: UserType::Admin,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(keys.secret.as_bytes()),
        )
        .unwrap();
        let result = verify_token(&keys, &token);
        assert!(matches!(result, Err(Error::AuthenticationFailure { .. })));
    }

    #[test]
    fn authenticate_accepts_raw_and_bearer_tokens() {
        let keys = test_keys();
        let token = issue_token(&keys, "7", UserType::Admin).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token.parse().unwrap());
        assert!(authenticate(&headers, &keys).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
        assert!(authenticate(&headers, &keys).is_ok());
    }

    #[test]
    fn authenticate_requires_the_header() {
        let headers = HeaderMap::new();
        let result = authenticate(&headers, &test_keys());
        assert!(matches!(result, Err(Error::AuthenticationFailure { .. })));
    }

    #[test]
    fn require_admin_rejects_student_claims() {
        let keys = test_keys();
        let token = issue_token(&keys, "2023-0001", UserType::Student).unwrap();
        let claims = verify_token(&keys, &token).unwrap();
        assert!(require_admin(&claims).is_err());
    }
}
