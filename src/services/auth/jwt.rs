use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{Role, User},
};

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub typ: TokenType,
    /// User's token version at issue time
    pub ver: u64,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Signing keys and lifetimes for both token kinds
#[derive(Debug, Clone)]
pub struct TokenKeys {
    access_secret: String,
    refresh_secret: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenKeys {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access_secret: config.jwt_secret.clone(),
            refresh_secret: config.jwt_refresh_secret.clone(),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    fn secret(&self, typ: TokenType) -> &str {
        match typ {
            TokenType::Access => &self.access_secret,
            TokenType::Refresh => &self.refresh_secret,
        }
    }

    pub fn issue_pair(&self, user: &User, now: i64) -> AppResult<TokenPair> {
        let claims = |typ, ttl| Claims {
            sub: user.id.clone(),
            role: user.role,
            typ,
            ver: user.token_version,
            iat: now,
            exp: now + ttl,
        };

        Ok(TokenPair {
            access_token: sign(
                &claims(TokenType::Access, self.access_ttl_secs),
                &self.access_secret,
            )?,
            refresh_token: sign(
                &claims(TokenType::Refresh, self.refresh_ttl_secs),
                &self.refresh_secret,
            )?,
            expires_in: self.access_ttl_secs,
        })
    }

    pub fn verify(&self, token: &str, typ: TokenType, now: i64) -> AppResult<Claims> {
        let claims = verify(token, self.secret(typ), now)?;
        if claims.typ != typ {
            return Err(AppError::unauthorized("INVALID_TOKEN", "Invalid token type"));
        }
        Ok(claims)
    }
}

fn mac(secret: &str) -> AppResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid signing key: {}", e)))
}

/// Encodes and signs claims as an HS256 JWT
pub fn sign(claims: &Claims, secret: &str) -> AppResult<String> {
    let header = URL_SAFE_NO_PAD.encode(HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);

    let mut mac = mac(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

/// Checks signature and expiry and returns the claims
pub fn verify(token: &str, secret: &str, now: i64) -> AppResult<Claims> {
    let invalid = || AppError::unauthorized("INVALID_TOKEN", "Invalid token");

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let header_json = URL_SAFE_NO_PAD.decode(header).map_err(|_| invalid())?;
    let header_value: serde_json::Value =
        serde_json::from_slice(&header_json).map_err(|_| invalid())?;
    if header_value.get("alg").and_then(|a| a.as_str()) != Some("HS256") {
        return Err(invalid());
    }

    let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
    let mut mac = mac(secret)?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature).map_err(|_| invalid())?;

    let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| invalid())?;

    if claims.exp <= now {
        return Err(AppError::unauthorized("TOKEN_EXPIRED", "Token has expired"));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: i64) -> Claims {
        Claims {
            sub: "user-1".to_string(),
            role: Role::Seller,
            typ: TokenType::Access,
            ver: 3,
            iat: 1_000,
            exp,
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let token = sign(&claims(2_000), "secret").unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(verify(&token, "secret", 1_500).unwrap(), claims(2_000));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(&claims(2_000), "secret").unwrap();
        let err = verify(&token, "other", 1_500).unwrap_err();
        assert_eq!(err.code(), "INVALID_TOKEN");
    }

    #[test]
    fn test_expired_token() {
        let token = sign(&claims(2_000), "secret").unwrap();
        let err = verify(&token, "secret", 2_000).unwrap_err();
        assert_eq!(err.code(), "TOKEN_EXPIRED");
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = sign(&claims(2_000), "secret").unwrap();
        let mut forged = claims(2_000);
        forged.role = Role::Superadmin;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(verify(&tampered, "secret", 1_500).unwrap_err().code(), "INVALID_TOKEN");
    }

    #[test]
    fn test_garbage_rejected() {
        for token in ["", "a.b", "a.b.c.d", "not-a-token"] {
            assert_eq!(verify(token, "secret", 0).unwrap_err().code(), "INVALID_TOKEN");
        }
    }

    #[test]
    fn test_refresh_token_not_accepted_as_access() {
        let keys = TokenKeys::from_config(&Config::for_tests());
        let now = 1_000;
        let refresh_claims = Claims {
            typ: TokenType::Refresh,
            ..claims(now + 100)
        };
        // Signed with the access secret but typed refresh
        let token = sign(&refresh_claims, &Config::for_tests().jwt_secret).unwrap();
        let err = keys.verify(&token, TokenType::Access, now).unwrap_err();
        assert_eq!(err.code(), "INVALID_TOKEN");
    }
}
