//! Request-scoped evaluation context.
//!
//! A [`UnifiedContext`] is built once per logical request from cookie and
//! header accessors and is read-only afterwards. [`RequestScope`] memoizes
//! both the visitor id and the full context so concurrent evaluations within
//! one request always agree on them.

mod extract;
mod sources;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use extract::{
    extract_request_context, extract_user_context, generate_visitor_id,
    get_or_generate_visitor_id, ExtractorConfig, RequestScope,
};
pub use sources::{CookieSource, HeaderSource, NoCookies, NoHeaders};

pub const ANONYMOUS_USER: &str = "anonymous";
pub const DEFAULT_COUNTRY: &str = "US";
pub const UNKNOWN: &str = "unknown";

/// Subscription tier derived from the subscription cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Premium,
    Enterprise,
}

impl Tier {
    /// Substring heuristics over a subscription cookie value.
    pub fn from_subscription(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("enterprise") {
            Tier::Enterprise
        } else if lower.contains("premium") {
            Tier::Premium
        } else if lower.contains("pro") {
            Tier::Pro
        } else {
            Tier::Free
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub id: String,
    pub tier: Tier,
    pub session_id: Option<String>,
}

impl UserContext {
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_USER.to_string(),
            tier: Tier::Free,
            session_id: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_USER
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorContext {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub country: String,
    pub user_agent: String,
    pub environment: String,
    pub deployment: String,
}

impl RequestContext {
    pub fn unknown() -> Self {
        Self {
            country: DEFAULT_COUNTRY.to_string(),
            user_agent: UNKNOWN.to_string(),
            environment: UNKNOWN.to_string(),
            deployment: UNKNOWN.to_string(),
        }
    }
}

/// Normalized, immutable evaluation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedContext {
    pub user: UserContext,
    pub visitor: VisitorContext,
    pub request: RequestContext,
    pub timestamp: DateTime<Utc>,
}

impl UnifiedContext {
    pub fn new(user: UserContext, visitor_id: impl Into<String>, request: RequestContext) -> Self {
        Self {
            user,
            visitor: VisitorContext {
                id: visitor_id.into(),
            },
            request,
            timestamp: Utc::now(),
        }
    }

    /// Minimal context used when extraction fails.
    pub fn fallback() -> Self {
        Self::new(
            UserContext::anonymous(),
            generate_visitor_id(),
            RequestContext::unknown(),
        )
    }

    /// Anonymous context for a known visitor. Handy for tests and jobs.
    pub fn for_visitor(visitor_id: impl Into<String>) -> Self {
        Self::new(UserContext::anonymous(), visitor_id, RequestContext::unknown())
    }

    /// Identity string used for bucketing: user id followed by visitor id.
    pub fn identity(&self) -> String {
        format!("{}{}", self.user.id, self.visitor.id)
    }
}
