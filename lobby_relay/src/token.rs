// HS256 JSON Web Tokens.
//
// The account service signs bearer tokens with a shared secret (HMAC-SHA256)
// and puts the user's UUID in the `sub` claim. `JwtAuthority` verifies them
// for the handshake processor and can also mint them, which the client
// tooling and the tests use.
//
// Only what the relay needs is checked: compact serialization, `alg` must be
// `HS256`, the signature (compared in constant time by `hmac`), `exp` when
// present, and a non-empty `sub`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::collaborators::{TokenClaims, TokenError, TokenVerifier};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<u64>,
}

/// Signs and verifies HS256 tokens with one shared secret.
#[derive(Clone)]
pub struct JwtAuthority {
    mac: HmacSha256,
}

impl JwtAuthority {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, InvalidLength> {
        let mac = HmacSha256::new_from_slice(secret.as_ref())?;
        Ok(Self { mac })
    }

    /// Mint a token for `subject`, expiring `ttl` from now (or never).
    pub fn issue(&self, subject: &str, ttl: Option<Duration>) -> Result<String, serde_json::Error> {
        let now = unix_now();
        self.issue_with_expiry(subject, ttl.map(|t| now.saturating_add(t.as_secs())))
    }

    /// Mint a token with an explicit `exp` (seconds since the Unix epoch).
    pub fn issue_with_expiry(
        &self,
        subject: &str,
        exp: Option<u64>,
    ) -> Result<String, serde_json::Error> {
        let header = Header {
            alg: ALGORITHM.into(),
            typ: Some("JWT".into()),
        };
        let claims = Claims {
            sub: Some(subject.into()),
            exp,
            iat: Some(unix_now()),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?),
        );
        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify `token` as of `now` (seconds since the Unix epoch).
    pub fn verify_at(&self, token: &str, now: u64) -> Result<TokenClaims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Claims = decode_segment(claims_b64)?;
        if claims.exp.is_some_and(|exp| now >= exp) {
            return Err(TokenError::Expired);
        }
        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(TokenError::MissingSubject)?;
        Ok(TokenClaims { subject })
    }
}

impl TokenVerifier for JwtAuthority {
    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, unix_now())
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBJECT: &str = "3f2504e0-4f89-41d3-9a0c-0305e82c3301";

    #[test]
    fn secrets_of_any_length_are_accepted() {
        let long = "k".repeat(200);
        for secret in ["", "short", long.as_str()] {
            let authority = JwtAuthority::new(secret).unwrap();
            let token = authority.issue(SUBJECT, None).unwrap();
            assert_eq!(authority.verify(&token).unwrap().subject, SUBJECT);
        }
    }

    #[test]
    fn issued_token_verifies() {
        let authority = JwtAuthority::new("secret").unwrap();
        let token = authority.issue(SUBJECT, Some(Duration::from_secs(60))).unwrap();
        let claims = authority.verify(&token).unwrap();
        assert_eq!(claims.subject, SUBJECT);
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = JwtAuthority::new("secret").unwrap().issue(SUBJECT, None).unwrap();
        assert_eq!(
            JwtAuthority::new("other").unwrap().verify(&token),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let authority = JwtAuthority::new("secret").unwrap();
        let token = authority.issue(SUBJECT, None).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = URL_SAFE_NO_PAD.encode(br#"{"sub":"someone-else"}"#);
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);
        assert_eq!(authority.verify(&forged), Err(TokenError::BadSignature));
    }

    #[test]
    fn expiry_is_enforced() {
        let authority = JwtAuthority::new("secret").unwrap();
        let token = authority.issue_with_expiry(SUBJECT, Some(1_000)).unwrap();
        assert!(authority.verify_at(&token, 999).is_ok());
        assert_eq!(authority.verify_at(&token, 1_000), Err(TokenError::Expired));
    }

    #[test]
    fn algorithm_none_is_rejected() {
        let authority = JwtAuthority::new("secret").unwrap();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{SUBJECT}"}}"#));
        let token = format!("{header}.{claims}.");
        assert_eq!(
            authority.verify(&token),
            Err(TokenError::UnsupportedAlgorithm("none".into()))
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let authority = JwtAuthority::new("secret").unwrap();
        assert_eq!(authority.verify("abc"), Err(TokenError::Malformed));
        assert_eq!(authority.verify("a.b.c.d"), Err(TokenError::Malformed));
        assert_eq!(authority.verify("!!.!!.!!"), Err(TokenError::Malformed));
    }

    #[test]
    fn empty_subject_is_rejected() {
        let authority = JwtAuthority::new("secret").unwrap();
        let token = authority.issue("", None).unwrap();
        assert_eq!(authority.verify(&token), Err(TokenError::MissingSubject));
    }
}
