/// Progress Store - Completion and Challenge Persistence
///
/// **Key Semantics (Redis):**
/// - `pyquest:progress:{lesson}` hash: section id -> RFC3339 completion time,
///   written with HSETNX so the first completion wins
/// - `pyquest:challenge:{lesson}:{section}:{challenge}`: last saved state of
///   a coverage challenge as JSON
///
/// The evaluator is the only writer.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pyquest_common::redis::{challenge_key, progress_key};
use pyquest_common::types::CoverageChallenge;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Record a completion. Returns true only when the section was not
    /// already complete; an existing timestamp is never overwritten.
    async fn mark_section_completed(&self, lesson_id: &str, section_id: &str) -> Result<bool>;

    async fn completed_sections(&self, lesson_id: &str) -> Result<BTreeMap<String, DateTime<Utc>>>;

    async fn completed_at(&self, lesson_id: &str, section_id: &str) -> Result<Option<DateTime<Utc>>>;

    async fn save_challenge(
        &self,
        lesson_id: &str,
        section_id: &str,
        challenge: &CoverageChallenge,
    ) -> Result<()>;

    async fn load_challenge(
        &self,
        lesson_id: &str,
        section_id: &str,
        challenge_id: &str,
    ) -> Result<Option<CoverageChallenge>>;
}

type ChallengeId = (String, String, String);

/// In-process store for the CLI and tests.
#[derive(Default)]
pub struct MemoryProgressStore {
    completions: RwLock<HashMap<String, BTreeMap<String, DateTime<Utc>>>>,
    challenges: RwLock<HashMap<ChallengeId, CoverageChallenge>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn mark_section_completed(&self, lesson_id: &str, section_id: &str) -> Result<bool> {
        let mut completions = self.completions.write().await;
        let lesson = completions.entry(lesson_id.to_string()).or_default();
        if lesson.contains_key(section_id) {
            return Ok(false);
        }
        lesson.insert(section_id.to_string(), Utc::now());
        Ok(true)
    }

    async fn completed_sections(&self, lesson_id: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let completions = self.completions.read().await;
        Ok(completions.get(lesson_id).cloned().unwrap_or_default())
    }

    async fn completed_at(&self, lesson_id: &str, section_id: &str) -> Result<Option<DateTime<Utc>>> {
        let completions = self.completions.read().await;
        Ok(completions
            .get(lesson_id)
            .and_then(|lesson| lesson.get(section_id))
            .copied())
    }

    async fn save_challenge(
        &self,
        lesson_id: &str,
        section_id: &str,
        challenge: &CoverageChallenge,
    ) -> Result<()> {
        let key = (lesson_id.to_string(), section_id.to_string(), challenge.id.clone());
        self.challenges.write().await.insert(key, challenge.clone());
        Ok(())
    }

    async fn load_challenge(
        &self,
        lesson_id: &str,
        section_id: &str,
        challenge_id: &str,
    ) -> Result<Option<CoverageChallenge>> {
        let key = (lesson_id.to_string(), section_id.to_string(), challenge_id.to_string());
        Ok(self.challenges.read().await.get(&key).cloned())
    }
}

/// Redis-backed store shared by every worker.
#[derive(Clone)]
pub struct RedisProgressStore {
    conn: ConnectionManager,
}

impl RedisProgressStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid completion timestamp: {}", raw))?
        .with_timezone(&Utc))
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn mark_section_completed(&self, lesson_id: &str, section_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let inserted: bool = conn
            .hset_nx(progress_key(lesson_id), section_id, Utc::now().to_rfc3339())
            .await
            .context("Failed to record completion")?;
        Ok(inserted)
    }

    async fn completed_sections(&self, lesson_id: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(progress_key(lesson_id))
            .await
            .context("Failed to read lesson progress")?;

        raw.into_iter()
            .map(|(section, stamp)| Ok((section, parse_timestamp(&stamp)?)))
            .collect()
    }

    async fn completed_at(&self, lesson_id: &str, section_id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(progress_key(lesson_id), section_id)
            .await
            .context("Failed to read section progress")?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    async fn save_challenge(
        &self,
        lesson_id: &str,
        section_id: &str,
        challenge: &CoverageChallenge,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(challenge)?;
        let _: () = conn
            .set(challenge_key(lesson_id, section_id, &challenge.id), payload)
            .await
            .context("Failed to save challenge")?;
        Ok(())
    }

    async fn load_challenge(
        &self,
        lesson_id: &str,
        section_id: &str,
        challenge_id: &str,
    ) -> Result<Option<CoverageChallenge>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .get(challenge_key(lesson_id, section_id, challenge_id))
            .await
            .context("Failed to load challenge")?;

        payload
            .map(|data| serde_json::from_str(&data).context("Failed to decode saved challenge"))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_is_append_only() {
        let store = MemoryProgressStore::new();
        assert!(store.mark_section_completed("l1", "s1").await.unwrap());
        let first = store.completed_at("l1", "s1").await.unwrap();

        assert!(!store.mark_section_completed("l1", "s1").await.unwrap());
        assert_eq!(store.completed_at("l1", "s1").await.unwrap(), first);
        assert_eq!(store.completed_sections("l1").await.unwrap().len(), 1);
        assert!(store.completed_sections("l2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_challenge_round_trip() {
        let store = MemoryProgressStore::new();
        let challenge = CoverageChallenge {
            id: "c1".to_string(),
            expected_output: "10".to_string(),
            actual_output: Some("9".to_string()),
            is_correct: Some(false),
            ..Default::default()
        };
        store.save_challenge("l1", "cov", &challenge).await.unwrap();

        assert_eq!(store.load_challenge("l1", "cov", "c1").await.unwrap(), Some(challenge));
        assert_eq!(store.load_challenge("l1", "other", "c1").await.unwrap(), None);
    }

    #[test]
    fn test_parse_timestamp() {
        let stamp = parse_timestamp("2024-03-01T12:00:00+00:00").unwrap();
        assert_eq!(stamp.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis on REDIS_URL
    async fn test_redis_store_keeps_first_completion() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let client = redis::Client::open(url).unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        let store = RedisProgressStore::new(conn);
        let lesson = format!("test-{}", uuid::Uuid::new_v4());

        assert!(store.mark_section_completed(&lesson, "s1").await.unwrap());
        let first = store.completed_at(&lesson, "s1").await.unwrap();
        assert!(!store.mark_section_completed(&lesson, "s1").await.unwrap());
        assert_eq!(store.completed_at(&lesson, "s1").await.unwrap(), first);
        assert!(store.completed_sections(&lesson).await.unwrap().contains_key("s1"));
    }
}
