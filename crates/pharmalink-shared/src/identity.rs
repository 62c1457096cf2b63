use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;

use crate::error::AuthError;
use crate::types::{Actor, Credential, PharmacyId};

/// Claims read from the bearer token payload. Signature is not checked
/// here; the server does that on every request and on the socket handshake.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "_id")]
    underscore_id: Option<String>,
    id: Option<String>,
    sub: Option<String>,
    #[serde(rename = "pharmacyName")]
    pharmacy_name: Option<String>,
    name: Option<String>,
    exp: Option<i64>,
}

/// Resolve the local actor from a bearer credential without a network call.
///
/// Fails closed: a missing, malformed, subject-less or expired credential
/// yields an error instead of an anonymous actor.
pub fn resolve(credential: &Credential) -> Result<Actor, AuthError> {
    if credential.is_empty() {
        return Err(AuthError::MissingCredential);
    }

    let claims = decode_claims(credential.expose())?;

    if let Some(exp) = claims.exp {
        if exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
    }

    let id = claims
        .underscore_id
        .or(claims.id)
        .or(claims.sub)
        .filter(|id| !id.trim().is_empty())
        .ok_or(AuthError::MissingSubject)?;

    Ok(Actor {
        id: PharmacyId(id),
        display_name: claims.pharmacy_name.or(claims.name),
        credential: credential.clone(),
    })
}

fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let mut segments = token.trim().split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_header), Some(payload), Some(_signature)) => payload,
        _ => {
            return Err(AuthError::MalformedCredential(
                "expected three dot-separated segments".into(),
            ))
        }
    };

    // Some issuers keep the padding; the URL-safe engine here does not accept it.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedCredential(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedCredential(format!("payload is not JSON: {e}")))
}

/// Unsigned token carrying `claims`, for tests.
#[cfg(any(test, feature = "test-support"))]
pub fn encode_test_token(claims: serde_json::Value) -> Credential {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    Credential::new(format!("{header}.{payload}.c2lnbmF0dXJl"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_underscore_id() {
        let token = encode_test_token(json!({ "_id": "66a1", "pharmacyName": "Central" }));
        let actor = resolve(&token).unwrap();
        assert_eq!(actor.id, PharmacyId::from("66a1"));
        assert_eq!(actor.display_name.as_deref(), Some("Central"));
        assert_eq!(actor.credential, token);
    }

    #[test]
    fn test_resolve_falls_back_to_sub() {
        let token = encode_test_token(json!({ "sub": "p-9" }));
        assert_eq!(resolve(&token).unwrap().id, PharmacyId::from("p-9"));
    }

    #[test]
    fn test_missing_credential() {
        assert_eq!(
            resolve(&Credential::new("  ")).unwrap_err(),
            AuthError::MissingCredential
        );
    }

    #[test]
    fn test_malformed_credential() {
        assert!(matches!(
            resolve(&Credential::new("not-a-jwt")),
            Err(AuthError::MalformedCredential(_))
        ));
        assert!(matches!(
            resolve(&Credential::new("a.%%%.c")),
            Err(AuthError::MalformedCredential(_))
        ));
    }

    #[test]
    fn test_expired_credential() {
        let token = encode_test_token(json!({ "_id": "x", "exp": 1_000 }));
        assert_eq!(resolve(&token).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn test_missing_subject() {
        let token = encode_test_token(json!({ "pharmacyName": "Nameless" }));
        assert_eq!(resolve(&token).unwrap_err(), AuthError::MissingSubject);
    }
}
