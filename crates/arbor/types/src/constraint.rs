//! Typed view over the constraint map.
//!
//! Constraint parameters travel inside capabilities as an open
//! `name -> params` map and are only interpreted at enforcement time. Known
//! names parse into the closed [`Constraint`] enum; unknown names are
//! ignored for forward compatibility.

use serde::{Deserialize, Serialize};

use crate::ConstraintMap;

/// The closed set of constraint kinds this kernel enforces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    TimeWindow,
    AllowedPaths,
    RateLimit,
    RequiresApproval,
}

impl ConstraintKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "time_window" => Some(Self::TimeWindow),
            "allowed_paths" => Some(Self::AllowedPaths),
            "rate_limit" => Some(Self::RateLimit),
            "requires_approval" => Some(Self::RequiresApproval),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TimeWindow => "time_window",
            Self::AllowedPaths => "allowed_paths",
            Self::RateLimit => "rate_limit",
            Self::RequiresApproval => "requires_approval",
        }
    }

    /// Stateless constraints are evaluated before stateful ones so a request
    /// doomed to fail never consumes a scarce resource.
    pub fn is_stateful(&self) -> bool {
        matches!(self, Self::RateLimit)
    }
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A parsed constraint entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Constraint {
    /// Current UTC hour must fall in `[start_hour, end_hour)`; wraps
    /// midnight when `start_hour > end_hour`.
    TimeWindow { start_hour: u32, end_hour: u32 },
    /// Resource URI must extend one of these paths at a segment boundary.
    AllowedPaths(Vec<String>),
    /// Token bucket of this size per `(principal, resource)` pair.
    RateLimit(u32),
    /// Defer to the external escalation workflow before granting.
    RequiresApproval(bool),
}

impl Constraint {
    /// Parse the parameters of a known constraint kind. Malformed parameters
    /// are an error (and become a violation at enforcement time) — a
    /// capability carrying a constraint the engine cannot read must not pass.
    pub fn parse(kind: ConstraintKind, params: &serde_json::Value) -> Result<Self, String> {
        match kind {
            ConstraintKind::TimeWindow => {
                let start_hour = u32_field(params, "start_hour")?;
                let end_hour = u32_field(params, "end_hour")?;
                if start_hour > 23 || end_hour > 23 {
                    return Err(format!(
                        "hours must be 0..=23, got start={} end={}",
                        start_hour, end_hour
                    ));
                }
                Ok(Self::TimeWindow {
                    start_hour,
                    end_hour,
                })
            }
            ConstraintKind::AllowedPaths => {
                let paths = params
                    .as_array()
                    .ok_or_else(|| "allowed_paths expects an array of strings".to_string())?
                    .iter()
                    .map(|p| {
                        p.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| "allowed_paths entries must be strings".to_string())
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::AllowedPaths(paths))
            }
            ConstraintKind::RateLimit => {
                let limit = params
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| "rate_limit expects a non-negative integer".to_string())?;
                Ok(Self::RateLimit(limit))
            }
            ConstraintKind::RequiresApproval => {
                let required = params
                    .as_bool()
                    .ok_or_else(|| "requires_approval expects a boolean".to_string())?;
                Ok(Self::RequiresApproval(required))
            }
        }
    }

    pub fn kind(&self) -> ConstraintKind {
        match self {
            Self::TimeWindow { .. } => ConstraintKind::TimeWindow,
            Self::AllowedPaths(_) => ConstraintKind::AllowedPaths,
            Self::RateLimit(_) => ConstraintKind::RateLimit,
            Self::RequiresApproval(_) => ConstraintKind::RequiresApproval,
        }
    }
}

/// True when the capability's constraint map asks for the external approval
/// workflow.
pub fn requires_approval(constraints: &ConstraintMap) -> bool {
    constraints
        .get(ConstraintKind::RequiresApproval.name())
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn u32_field(params: &serde_json::Value, field: &str) -> Result<u32, String> {
    params
        .get(field)
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| format!("missing or non-integer field `{}`", field))
}
