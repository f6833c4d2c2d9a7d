//! Verification of WebApp launch credentials.
//!
//! Clients send `Authorization: tma <init-data>`, where `<init-data>` is the
//! URL-encoded query string the platform hands to an embedded app. The payload
//! is signed with a key derived from the bot token:
//!
//! ```text
//! secret_key = HMAC_SHA256(key = "WebAppData", msg = bot_token)
//! hash       = hex(HMAC_SHA256(key = secret_key, msg = data_check_string))
//! ```
//!
//! `data_check_string` is every field except `hash`, rendered as `key=value`,
//! sorted by key and joined with `\n`.

use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

/// Authorization scheme marker, followed by a single space and the payload.
pub const SCHEME: &str = "tma";

const SECRET_KEY_SALT: &[u8] = b"WebAppData";

/// The `user` object embedded in the launch payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LaunchUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// A verified launch payload.
#[derive(Debug, Clone)]
pub struct LaunchData {
    pub user: LaunchUser,
    pub auth_date: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Authorization header must use the 'tma' scheme")]
    WrongScheme,
    #[error("Launch payload is empty")]
    Empty,
    #[error("Launch payload field '{0}' appears more than once")]
    DuplicateField(String),
    #[error("Launch payload is not signed")]
    MissingHash,
    #[error("Launch payload hash is not valid hex")]
    MalformedHash,
    #[error("Launch payload signature does not match")]
    BadSignature,
    #[error("Launch payload has no valid auth_date")]
    MissingAuthDate,
    #[error("Launch payload has expired")]
    Expired,
    #[error("Launch payload has no user")]
    MissingUser,
    #[error("Launch payload user is malformed: {0}")]
    MalformedUser(String),
}

/// Split `tma <payload>` into its payload.
pub fn strip_scheme(header: &str) -> Result<&str, LaunchError> {
    let payload = header
        .strip_prefix(SCHEME)
        .and_then(|rest| rest.strip_prefix(' '))
        .ok_or(LaunchError::WrongScheme)?;
    if payload.is_empty() {
        return Err(LaunchError::Empty);
    }
    Ok(payload)
}

/// Verifies launch payloads against the secret derived from one bot token.
#[derive(Clone)]
pub struct LaunchVerifier {
    secret_key: Vec<u8>,
    max_age: Option<TimeDelta>,
}

impl std::fmt::Debug for LaunchVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchVerifier")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl LaunchVerifier {
    /// `max_age` bounds how old `auth_date` may be; `None` disables the check.
    pub fn new(bot_token: &str, max_age: Option<TimeDelta>) -> Self {
        let mut mac = new_mac(SECRET_KEY_SALT);
        mac.update(bot_token.as_bytes());
        Self {
            secret_key: mac.finalize().into_bytes().to_vec(),
            max_age,
        }
    }

    /// Check the signature and freshness of `payload`, then decode its user.
    pub fn verify(&self, payload: &str, now: DateTime<Utc>) -> Result<LaunchData, LaunchError> {
        let mut fields: Vec<(String, String)> = Vec::new();
        for (key, value) in form_urlencoded::parse(payload.as_bytes()) {
            if fields.iter().any(|(seen, _)| *seen == key) {
                return Err(LaunchError::DuplicateField(key.into_owned()));
            }
            fields.push((key.into_owned(), value.into_owned()));
        }
        if fields.is_empty() {
            return Err(LaunchError::Empty);
        }

        let hash_idx = fields
            .iter()
            .position(|(key, _)| key == "hash")
            .ok_or(LaunchError::MissingHash)?;
        let (_, hash) = fields.swap_remove(hash_idx);
        let expected = hex::decode(hash).map_err(|_| LaunchError::MalformedHash)?;

        let mut mac = new_mac(&self.secret_key);
        mac.update(data_check_string(&fields).as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| LaunchError::BadSignature)?;

        let auth_date = field(&fields, "auth_date")
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or(LaunchError::MissingAuthDate)?;
        if let Some(max_age) = self.max_age {
            if now - auth_date > max_age {
                return Err(LaunchError::Expired);
            }
        }

        let user = field(&fields, "user").ok_or(LaunchError::MissingUser)?;
        let user: LaunchUser = serde_json::from_str(user)
            .map_err(|err| LaunchError::MalformedUser(err.to_string()))?;

        Ok(LaunchData { user, auth_date })
    }

    /// Produce a signed payload for `fields`, in the same encoding the
    /// platform uses. Intended for fixtures and local development clients.
    pub fn sign(&self, fields: &[(&str, &str)]) -> String {
        let owned: Vec<(String, String)> = fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let mut mac = new_mac(&self.secret_key);
        mac.update(data_check_string(&owned).as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .append_pair("hash", &hash)
            .finish()
    }
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length")
}

fn data_check_string(fields: &[(String, String)]) -> String {
    let mut lines: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    lines.sort();
    lines.join("\n")
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "123456:TEST-TOKEN";

    fn verifier() -> LaunchVerifier {
        LaunchVerifier::new(BOT_TOKEN, Some(TimeDelta::hours(24)))
    }

    fn auth_date(now: DateTime<Utc>) -> String {
        now.timestamp().to_string()
    }

    #[test]
    fn strip_scheme_requires_marker_and_single_space() {
        assert_eq!(strip_scheme("tma query_id=1"), Ok("query_id=1"));
        assert_eq!(strip_scheme("Bearer abc"), Err(LaunchError::WrongScheme));
        assert_eq!(strip_scheme("tmaquery_id=1"), Err(LaunchError::WrongScheme));
        assert_eq!(strip_scheme("tma "), Err(LaunchError::Empty));
        assert_eq!(strip_scheme(""), Err(LaunchError::WrongScheme));
    }

    #[test]
    fn signed_payload_verifies() {
        let now = Utc::now();
        let date = auth_date(now);
        let payload = verifier().sign(&[
            ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
            ("user", r#"{"id":42,"first_name":"Ivan","last_name":"Petrov"}"#),
            ("auth_date", &date),
        ]);

        let data = verifier().verify(&payload, now).expect("payload should verify");
        assert_eq!(data.user.id, 42);
        assert_eq!(data.user.first_name.as_deref(), Some("Ivan"));
        assert_eq!(data.auth_date.timestamp(), now.timestamp());
    }

    #[test]
    fn field_order_does_not_affect_signature() {
        let now = Utc::now();
        let date = auth_date(now);
        let signed = verifier().sign(&[("user", r#"{"id":1}"#), ("auth_date", &date)]);
        let (body, hash) = signed.rsplit_once("&hash=").unwrap();
        let (user, date_pair) = body.split_once('&').unwrap();
        let reordered = format!("hash={hash}&{date_pair}&{user}");
        assert!(verifier().verify(&reordered, now).is_ok());
    }

    #[test]
    fn tampered_user_is_rejected() {
        let now = Utc::now();
        let date = auth_date(now);
        let payload = verifier().sign(&[("user", r#"{"id":42}"#), ("auth_date", &date)]);
        let forged = payload.replace("42", "43");
        assert_eq!(
            verifier().verify(&forged, now).unwrap_err(),
            LaunchError::BadSignature
        );
    }

    #[test]
    fn unsigned_payload_is_rejected() {
        let now = Utc::now();
        let payload = format!(
            "user=%7B%22id%22%3A42%7D&auth_date={}",
            auth_date(now)
        );
        assert_eq!(
            verifier().verify(&payload, now).unwrap_err(),
            LaunchError::MissingHash
        );
    }

    #[test]
    fn payload_signed_for_another_bot_is_rejected() {
        let now = Utc::now();
        let date = auth_date(now);
        let other = LaunchVerifier::new("999:OTHER", None);
        let payload = other.sign(&[("user", r#"{"id":42}"#), ("auth_date", &date)]);
        assert_eq!(
            verifier().verify(&payload, now).unwrap_err(),
            LaunchError::BadSignature
        );
    }

    #[test]
    fn non_hex_hash_is_rejected() {
        let now = Utc::now();
        let payload = format!("auth_date={}&hash=zz", auth_date(now));
        assert_eq!(
            verifier().verify(&payload, now).unwrap_err(),
            LaunchError::MalformedHash
        );
    }

    #[test]
    fn stale_payload_is_rejected_unless_age_check_disabled() {
        let now = Utc::now();
        let old = (now - TimeDelta::days(2)).timestamp().to_string();
        let payload = verifier().sign(&[("user", r#"{"id":42}"#), ("auth_date", &old)]);
        assert_eq!(
            verifier().verify(&payload, now).unwrap_err(),
            LaunchError::Expired
        );

        let lenient = LaunchVerifier::new(BOT_TOKEN, None);
        assert!(lenient.verify(&payload, now).is_ok());
    }

    #[test]
    fn missing_or_malformed_user_is_rejected() {
        let now = Utc::now();
        let date = auth_date(now);

        let no_user = verifier().sign(&[("auth_date", &date)]);
        assert_eq!(
            verifier().verify(&no_user, now).unwrap_err(),
            LaunchError::MissingUser
        );

        let bad_json = verifier().sign(&[("user", "{not json"), ("auth_date", &date)]);
        assert!(matches!(
            verifier().verify(&bad_json, now).unwrap_err(),
            LaunchError::MalformedUser(_)
        ));

        let no_id = verifier().sign(&[("user", r#"{"first_name":"x"}"#), ("auth_date", &date)]);
        assert!(matches!(
            verifier().verify(&no_id, now).unwrap_err(),
            LaunchError::MalformedUser(_)
        ));
    }

    #[test]
    fn missing_auth_date_is_rejected() {
        let now = Utc::now();
        let payload = verifier().sign(&[("user", r#"{"id":42}"#)]);
        assert_eq!(
            verifier().verify(&payload, now).unwrap_err(),
            LaunchError::MissingAuthDate
        );
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let now = Utc::now();
        let date = auth_date(now);
        let payload = verifier().sign(&[("user", r#"{"id":42}"#), ("auth_date", &date)]);
        let doubled = format!("{payload}&user=%7B%22id%22%3A1%7D");
        assert_eq!(
            verifier().verify(&doubled, now).unwrap_err(),
            LaunchError::DuplicateField("user".to_string())
        );
    }
}
