use anyhow::Context;
use uuid::Uuid;

// Advisory locks are scoped to the Postgres session. This is used as a
// best-effort guard against concurrent plan generations for the same profile.
const LOCK_NAMESPACE: i64 = 0x4E55_5452_4950; // "NUTRIP" as hex-ish namespace.

// The key derives from the first 8 bytes of the profile UUID; v4 ids make
// prefix collisions negligible for an advisory lock.
fn lock_key_for_profile(profile_id: Uuid) -> i64 {
    let bytes = profile_id.as_bytes();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&bytes[..8]);
    LOCK_NAMESPACE ^ i64::from_be_bytes(prefix)
}

pub async fn try_acquire_profile_lock(
    pool: &sqlx::PgPool,
    profile_id: Uuid,
) -> anyhow::Result<bool> {
    let key = lock_key_for_profile(profile_id);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_profile_lock(pool: &sqlx::PgPool, profile_id: Uuid) -> anyhow::Result<()> {
    let key = lock_key_for_profile(profile_id);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_stable_and_prefix_sensitive() {
        let a = Uuid::parse_str("8f8b7d3e-2c1a-4ed0-9b3f-111111111111").unwrap();
        let b = Uuid::parse_str("00000000-0000-4000-8000-000000000000").unwrap();
        assert_eq!(lock_key_for_profile(a), lock_key_for_profile(a));
        assert_ne!(lock_key_for_profile(a), lock_key_for_profile(b));
    }
}
