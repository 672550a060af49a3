use crate::types::{Submission, SubmissionOutcome};
use redis::{AsyncCommands, RedisResult};

/// Redis key semantics shared by the worker, the CLI and the progress store.
/// Keys are deterministic so every component agrees on where a submission,
/// its outcome and a lesson's completion record live.

pub const QUEUE_KEY: &str = "pyquest:queue:submissions";
pub const RESULT_PREFIX: &str = "pyquest:result";
pub const PROGRESS_PREFIX: &str = "pyquest:progress";
pub const CHALLENGE_PREFIX: &str = "pyquest:challenge";

/// Outcomes are kept for 24 hours
pub const RESULT_TTL_SECONDS: u64 = 86400;

/// Result key for a submission
pub fn result_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

/// Completion hash for a lesson (section id -> completion timestamp)
pub fn progress_key(lesson_id: &str) -> String {
    format!("{}:{}", PROGRESS_PREFIX, lesson_id)
}

/// Saved state of one coverage challenge
pub fn challenge_key(lesson_id: &str, section_id: &str, challenge_id: &str) -> String {
    format!("{}:{}:{}:{}", CHALLENGE_PREFIX, lesson_id, section_id, challenge_id)
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

fn deserialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
}

/// Push a submission onto the evaluation queue
/// Uses RPUSH for FIFO semantics
pub async fn push_submission(
    conn: &mut redis::aio::ConnectionManager,
    submission: &Submission,
) -> RedisResult<()> {
    let payload = serde_json::to_string(submission).map_err(serialization_error)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a submission from the evaluation queue
/// Uses BLPOP with timeout for graceful shutdown
pub async fn pop_submission(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<Submission>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let submission: Submission =
                serde_json::from_str(&payload).map_err(deserialization_error)?;
            Ok(Some(submission))
        }
        None => Ok(None),
    }
}

/// Store an evaluation outcome with a 24-hour TTL
pub async fn store_outcome(
    conn: &mut redis::aio::ConnectionManager,
    outcome: &SubmissionOutcome,
) -> RedisResult<()> {
    let key = result_key(&outcome.submission_id);
    let payload = serde_json::to_string(outcome).map_err(serialization_error)?;
    let _: () = conn.set_ex(&key, payload, RESULT_TTL_SECONDS).await?;
    Ok(())
}

/// Retrieve an evaluation outcome
pub async fn get_outcome(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &uuid::Uuid,
) -> RedisResult<Option<SubmissionOutcome>> {
    let key = result_key(submission_id);
    let payload: Option<String> = conn.get(&key).await?;

    match payload {
        Some(data) => {
            let outcome: SubmissionOutcome =
                serde_json::from_str(&data).map_err(deserialization_error)?;
            Ok(Some(outcome))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_result_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = result_key(&id);
        let key2 = result_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("pyquest:result:"));
    }

    #[test]
    fn test_progress_key_format() {
        assert_eq!(progress_key("lesson-3"), "pyquest:progress:lesson-3");
    }

    #[test]
    fn test_challenge_key_includes_all_ids() {
        let key = challenge_key("lesson-3", "coverage-1", "c2");
        assert_eq!(key, "pyquest:challenge:lesson-3:coverage-1:c2");
    }
}
