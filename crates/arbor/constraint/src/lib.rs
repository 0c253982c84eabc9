//! Arbor Constraint - runtime constraint enforcement
//!
//! Evaluates a capability's constraint map at authorization time. Stateless
//! checks (`time_window`, `allowed_paths`) run before stateful ones
//! (`rate_limit`) so a request doomed to fail never consumes a token —
//! nobody is charged for a rejected request.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::RwLock;

use arbor_types::{path_segment_prefix, AgentId, Constraint, ConstraintKind, ConstraintMap};
use chrono::{DateTime, Timelike, Utc};
use thiserror::Error;
use tracing::debug;

/// Refill window for rate-limit buckets, in seconds.
const RATE_WINDOW_SECS: i64 = 60;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The constraint enforcement engine. Owns the per-(principal, resource)
/// token buckets; everything else is stateless.
pub struct ConstraintEngine {
    buckets: RwLock<HashMap<(AgentId, String), TokenBucket>>,
    clock: Clock,
}

#[derive(Clone, Copy, Debug)]
struct TokenBucket {
    remaining: u32,
    window_started_at: DateTime<Utc>,
}

impl ConstraintEngine {
    pub fn new() -> Self {
        Self::with_clock(Box::new(Utc::now))
    }

    /// Engine with an injected clock, so time-window and refill behavior is
    /// testable without waiting for wall time.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Enforce every known constraint in the map against the request.
    ///
    /// Empty or unknown-only maps always pass. Malformed parameters for a
    /// known constraint are a violation — a constraint the engine cannot
    /// read must not silently pass.
    pub fn enforce(
        &self,
        constraints: &ConstraintMap,
        principal: &AgentId,
        resource_uri: &str,
    ) -> Result<(), ConstraintError> {
        let mut parsed = Vec::new();
        for (name, params) in constraints {
            let Some(kind) = ConstraintKind::from_name(name) else {
                continue; // forward-compatible: unknown constraints are ignored
            };
            let constraint = Constraint::parse(kind, params)
                .map_err(|detail| ConstraintError::Violated { kind, detail })?;
            parsed.push(constraint);
        }

        // Stateless first. The order within each class is the map's
        // (deterministic) order.
        parsed.sort_by_key(|c| c.kind().is_stateful());

        for constraint in &parsed {
            self.check(constraint, principal, resource_uri)?;
        }
        Ok(())
    }

    fn check(
        &self,
        constraint: &Constraint,
        principal: &AgentId,
        resource_uri: &str,
    ) -> Result<(), ConstraintError> {
        match constraint {
            Constraint::TimeWindow {
                start_hour,
                end_hour,
            } => self.check_time_window(*start_hour, *end_hour),
            Constraint::AllowedPaths(paths) => check_allowed_paths(paths, resource_uri),
            Constraint::RateLimit(limit) => self.take_token(*limit, principal, resource_uri),
            // The escalation workflow lives outside this engine; the kernel
            // reads this flag directly.
            Constraint::RequiresApproval(_) => Ok(()),
        }
    }

    fn check_time_window(&self, start_hour: u32, end_hour: u32) -> Result<(), ConstraintError> {
        let hour = (self.clock)().hour();
        let inside = if start_hour <= end_hour {
            hour >= start_hour && hour < end_hour
        } else {
            // Window wraps midnight, e.g. 22..6.
            hour >= start_hour || hour < end_hour
        };
        if inside {
            Ok(())
        } else {
            Err(ConstraintError::Violated {
                kind: ConstraintKind::TimeWindow,
                detail: format!(
                    "hour {} outside window [{}, {})",
                    hour, start_hour, end_hour
                ),
            })
        }
    }

    /// Consume one token from the `(principal, resource)` bucket, refilling
    /// it to `limit` when the window has rolled over.
    fn take_token(
        &self,
        limit: u32,
        principal: &AgentId,
        resource_uri: &str,
    ) -> Result<(), ConstraintError> {
        let now = (self.clock)();
        let key = (principal.clone(), resource_uri.to_string());

        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| ConstraintError::LockError)?;
        let bucket = buckets.entry(key).or_insert(TokenBucket {
            remaining: limit,
            window_started_at: now,
        });

        if (now - bucket.window_started_at).num_seconds() >= RATE_WINDOW_SECS {
            bucket.remaining = limit;
            bucket.window_started_at = now;
        }

        if bucket.remaining == 0 {
            debug!(principal = %principal, resource = resource_uri, limit, "rate limit exhausted");
            return Err(ConstraintError::Violated {
                kind: ConstraintKind::RateLimit,
                detail: format!("limit {}, remaining 0", limit),
            });
        }
        bucket.remaining -= 1;
        Ok(())
    }

    /// Remaining tokens in a bucket, if one exists. Read-only; used by
    /// tests and diagnostics.
    pub fn remaining_tokens(&self, principal: &AgentId, resource_uri: &str) -> Option<u32> {
        self.buckets
            .read()
            .ok()?
            .get(&(principal.clone(), resource_uri.to_string()))
            .map(|bucket| bucket.remaining)
    }
}

impl Default for ConstraintEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn check_allowed_paths(paths: &[String], resource_uri: &str) -> Result<(), ConstraintError> {
    if paths
        .iter()
        .any(|path| path_segment_prefix(path, resource_uri))
    {
        Ok(())
    } else {
        Err(ConstraintError::Violated {
            kind: ConstraintKind::AllowedPaths,
            detail: format!("{} matches none of {} allowed paths", resource_uri, paths.len()),
        })
    }
}

/// Constraint enforcement errors.
#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("constraint violated ({kind}): {detail}")]
    Violated {
        kind: ConstraintKind,
        detail: String,
    },

    #[error("lock error")]
    LockError,
}

impl ConstraintError {
    pub fn kind(&self) -> Option<ConstraintKind> {
        match self {
            Self::Violated { kind, .. } => Some(*kind),
            Self::LockError => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at_hour(hour: u32) -> ConstraintEngine {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, hour, 30, 0).unwrap();
        ConstraintEngine::with_clock(Box::new(move || now))
    }

    fn principal() -> AgentId {
        AgentId::new("agent-a")
    }

    fn map(entries: &[(&str, serde_json::Value)]) -> ConstraintMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn empty_map_passes() {
        let engine = ConstraintEngine::new();
        engine
            .enforce(&ConstraintMap::new(), &principal(), "arbor://fs/read/x")
            .unwrap();
    }

    #[test]
    fn unknown_constraints_are_ignored() {
        let engine = ConstraintEngine::new();
        let constraints = map(&[("max_velocity", json!(99))]);
        engine
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .unwrap();
    }

    #[test]
    fn malformed_known_constraint_is_a_violation() {
        let engine = ConstraintEngine::new();
        let constraints = map(&[("rate_limit", json!("plenty"))]);
        let err = engine
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .unwrap_err();
        assert_eq!(err.kind(), Some(ConstraintKind::RateLimit));
    }

    #[test]
    fn time_window_accepts_inside_hours() {
        let constraints = map(&[("time_window", json!({"start_hour": 9, "end_hour": 17}))]);
        at_hour(12)
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .unwrap();
        let err = at_hour(18)
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .unwrap_err();
        assert_eq!(err.kind(), Some(ConstraintKind::TimeWindow));
        // end_hour is exclusive
        assert!(at_hour(17)
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .is_err());
    }

    #[test]
    fn time_window_wraps_midnight() {
        let constraints = map(&[("time_window", json!({"start_hour": 22, "end_hour": 6}))]);
        assert!(at_hour(23)
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .is_ok());
        assert!(at_hour(3)
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .is_ok());
        assert!(at_hour(12)
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .is_err());
    }

    #[test]
    fn allowed_paths_is_segment_prefix_not_substring() {
        let engine = ConstraintEngine::new();
        let constraints = map(&[("allowed_paths", json!(["/home"]))]);
        engine
            .enforce(&constraints, &principal(), "/home/user/file")
            .unwrap();
        engine.enforce(&constraints, &principal(), "/home").unwrap();
        let err = engine
            .enforce(&constraints, &principal(), "/home_config")
            .unwrap_err();
        assert_eq!(err.kind(), Some(ConstraintKind::AllowedPaths));
    }

    #[test]
    fn allowed_paths_matches_resource_uris() {
        let engine = ConstraintEngine::new();
        let constraints = map(&[("allowed_paths", json!(["arbor://fs/read/project/src"]))]);
        assert!(engine
            .enforce(&constraints, &principal(), "arbor://fs/read/project/src/main")
            .is_ok());
        assert!(engine
            .enforce(&constraints, &principal(), "arbor://fs/write/project/src/main")
            .is_err());
    }

    #[test]
    fn rate_limit_exhausts_and_reports() {
        let engine = ConstraintEngine::new();
        let constraints = map(&[("rate_limit", json!(2))]);
        let uri = "arbor://api/call/llm";

        engine.enforce(&constraints, &principal(), uri).unwrap();
        engine.enforce(&constraints, &principal(), uri).unwrap();
        let err = engine.enforce(&constraints, &principal(), uri).unwrap_err();
        assert_eq!(err.kind(), Some(ConstraintKind::RateLimit));
        assert_eq!(engine.remaining_tokens(&principal(), uri), Some(0));
    }

    #[test]
    fn rate_limit_buckets_are_per_principal_and_resource() {
        let engine = ConstraintEngine::new();
        let constraints = map(&[("rate_limit", json!(1))]);

        engine
            .enforce(&constraints, &principal(), "arbor://api/call/a")
            .unwrap();
        // Different resource: fresh bucket.
        engine
            .enforce(&constraints, &principal(), "arbor://api/call/b")
            .unwrap();
        // Different principal: fresh bucket.
        engine
            .enforce(&constraints, &AgentId::new("agent-b"), "arbor://api/call/a")
            .unwrap();
        assert!(engine
            .enforce(&constraints, &principal(), "arbor://api/call/a")
            .is_err());
    }

    #[test]
    fn bucket_refills_after_window() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let now = std::sync::Arc::new(RwLock::new(start));
        let clock_now = std::sync::Arc::clone(&now);
        let engine =
            ConstraintEngine::with_clock(Box::new(move || *clock_now.read().unwrap()));
        let constraints = map(&[("rate_limit", json!(1))]);
        let uri = "arbor://api/call/llm";

        engine.enforce(&constraints, &principal(), uri).unwrap();
        assert!(engine.enforce(&constraints, &principal(), uri).is_err());

        *now.write().unwrap() = start + Duration::seconds(61);
        engine.enforce(&constraints, &principal(), uri).unwrap();
    }

    #[test]
    fn stateless_failure_never_consumes_a_token() {
        // Outside the window AND rate-limited: the time check must fire
        // first and leave the bucket untouched.
        let engine = at_hour(20);
        let constraints = map(&[
            ("rate_limit", json!(3)),
            ("time_window", json!({"start_hour": 9, "end_hour": 17})),
        ]);
        let uri = "arbor://api/call/llm";

        let err = engine.enforce(&constraints, &principal(), uri).unwrap_err();
        assert_eq!(err.kind(), Some(ConstraintKind::TimeWindow));
        assert_eq!(engine.remaining_tokens(&principal(), uri), None);
    }

    #[test]
    fn requires_approval_passes_here() {
        let engine = ConstraintEngine::new();
        let constraints = map(&[("requires_approval", json!(true))]);
        engine
            .enforce(&constraints, &principal(), "arbor://fs/read/x")
            .unwrap();
    }
}
