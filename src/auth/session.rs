use chrono::{Duration, SecondsFormat, Utc};
use rand::Rng;

use crate::db::models::Session;
use crate::store::{RecordStore, StoreError};

/// Upper bound on a session lifetime, about a century.
const MAX_SESSION_HOURS: u64 = 876_000;

/// Create a new session for a user. Returns the session token.
pub async fn create_session(
    store: &dyn RecordStore,
    user_id: &str,
    hours: u64,
) -> Result<String, StoreError> {
    let now = Utc::now();
    let expires = now + Duration::hours(hours.min(MAX_SESSION_HOURS) as i64);

    let session = Session {
        token: generate_token(),
        user_id: user_id.to_string(),
        created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        expires_at: expires.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    let session = store.insert_session(session).await?;
    Ok(session.token)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours.min(MAX_SESSION_HOURS) * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
    }

    #[test]
    fn cookies_carry_name_and_lifetime() {
        assert_eq!(
            session_cookie("zenswap_session", "abc", 2),
            "zenswap_session=abc; HttpOnly; SameSite=Strict; Path=/; Max-Age=7200"
        );
        assert!(clear_session_cookie("zenswap_session").contains("Max-Age=0"));
    }

    #[test]
    fn cookie_lifetime_is_capped() {
        let cookie = session_cookie("zenswap_session", "abc", u64::MAX);
        assert!(cookie.ends_with(&format!("Max-Age={}", MAX_SESSION_HOURS * 3600)));
    }

    #[tokio::test]
    async fn created_session_is_stored_and_unexpired() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).await.unwrap();

        let token = create_session(&store, "u1", 168).await.unwrap();
        let session = store.get_session(&token).await.unwrap().unwrap();
        assert_eq!(session.user_id, "u1");
        assert!(!session.is_expired(&crate::store::now_timestamp()));
    }
}
