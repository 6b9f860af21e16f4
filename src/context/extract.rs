use std::sync::{Arc, OnceLock};

use uuid::Uuid;

use crate::error::ContextError;

use super::{
    CookieSource, HeaderSource, RequestContext, Tier, UnifiedContext, UserContext,
    ANONYMOUS_USER, DEFAULT_COUNTRY, UNKNOWN,
};

const MAX_IDENTIFIER_LEN: usize = 128;
const MAX_USER_AGENT_LEN: usize = 512;
const DEFAULT_VISITOR_HEADER: &str = "x-visitor-id";

/// Cookie and header names consulted during extraction, plus process defaults.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub visitor_cookie: String,
    pub visitor_header: String,
    pub user_cookie: String,
    pub session_cookie: String,
    pub subscription_cookie: String,
    /// Geo headers in priority order; the first usable one wins.
    pub geo_headers: Vec<String>,
    pub environment_header: String,
    pub deployment_header: String,
    pub default_environment: String,
    pub default_deployment: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            visitor_cookie: "visitor-id".to_string(),
            visitor_header: DEFAULT_VISITOR_HEADER.to_string(),
            user_cookie: "user-id".to_string(),
            session_cookie: "session-id".to_string(),
            subscription_cookie: "subscription".to_string(),
            geo_headers: vec![
                "x-vercel-ip-country".to_string(),
                "cf-ipcountry".to_string(),
                "x-country".to_string(),
            ],
            environment_header: "x-environment".to_string(),
            deployment_header: "x-deployment-id".to_string(),
            default_environment: "development".to_string(),
            default_deployment: UNKNOWN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitorOrigin {
    Cookie,
    Header,
    Generated,
}

#[derive(Debug)]
struct ResolvedVisitor {
    id: String,
    origin: VisitorOrigin,
}

/// Fresh random visitor id.
pub fn generate_visitor_id() -> String {
    Uuid::new_v4().to_string()
}

/// Returns the visitor id from the cookie store, else from a header an
/// upstream hop set, else a freshly generated one.
///
/// This does not memoize; use [`RequestScope::visitor_id`] when several
/// evaluations share one request.
pub fn get_or_generate_visitor_id(
    cookies: &dyn CookieSource,
    headers: &dyn HeaderSource,
    cookie_name: &str,
) -> String {
    resolve_visitor(cookies, headers, cookie_name, DEFAULT_VISITOR_HEADER).id
}

fn resolve_visitor(
    cookies: &dyn CookieSource,
    headers: &dyn HeaderSource,
    cookie_name: &str,
    header_name: &str,
) -> ResolvedVisitor {
    if let Some(id) = cookies.cookie(cookie_name).filter(|id| valid_identifier(id)) {
        return ResolvedVisitor {
            id,
            origin: VisitorOrigin::Cookie,
        };
    }
    if let Some(id) = headers.header(header_name).filter(|id| valid_identifier(id)) {
        return ResolvedVisitor {
            id,
            origin: VisitorOrigin::Header,
        };
    }
    ResolvedVisitor {
        id: generate_visitor_id(),
        origin: VisitorOrigin::Generated,
    }
}

fn valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'))
}

fn optional_identifier(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<String>, ContextError> {
    match value {
        Some(v) if v.is_empty() => Ok(None),
        Some(v) if v.len() > MAX_IDENTIFIER_LEN => Err(ContextError::InvalidIdentifier {
            field,
            reason: "too long",
        }),
        Some(v) if !valid_identifier(&v) => Err(ContextError::InvalidIdentifier {
            field,
            reason: "unsupported characters",
        }),
        other => Ok(other),
    }
}

fn try_extract_user(
    cookies: &dyn CookieSource,
    config: &ExtractorConfig,
) -> Result<UserContext, ContextError> {
    let id = optional_identifier("user id", cookies.cookie(&config.user_cookie))?
        .unwrap_or_else(|| ANONYMOUS_USER.to_string());
    let session_id = optional_identifier("session id", cookies.cookie(&config.session_cookie))?;
    let tier = cookies
        .cookie(&config.subscription_cookie)
        .map(|raw| Tier::from_subscription(&raw))
        .unwrap_or_default();

    Ok(UserContext {
        id,
        tier,
        session_id,
    })
}

/// User part of the context. Falls back to the anonymous user on bad input.
pub fn extract_user_context(cookies: &dyn CookieSource, config: &ExtractorConfig) -> UserContext {
    try_extract_user(cookies, config).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "user context extraction failed, using anonymous user");
        UserContext::anonymous()
    })
}

fn normalize_country(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| trimmed.to_ascii_uppercase())
}

/// Request part of the context. Never fails; missing values get defaults.
pub fn extract_request_context(
    headers: &dyn HeaderSource,
    config: &ExtractorConfig,
) -> RequestContext {
    let country = config
        .geo_headers
        .iter()
        .filter_map(|name| headers.header(name))
        .find_map(|raw| normalize_country(&raw))
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());

    let user_agent = headers
        .header("user-agent")
        .filter(|ua| !ua.is_empty())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let environment = headers
        .header(&config.environment_header)
        .filter(|env| valid_identifier(env))
        .unwrap_or_else(|| config.default_environment.clone());

    let deployment = headers
        .header(&config.deployment_header)
        .filter(|id| valid_identifier(id))
        .unwrap_or_else(|| config.default_deployment.clone());

    RequestContext {
        country,
        user_agent,
        environment,
        deployment,
    }
}

/// Per-request extraction with single-flight memoization.
///
/// The first caller resolves the visitor id and context; concurrent callers
/// block on that resolution and then share its result.
pub struct RequestScope {
    cookies: Arc<dyn CookieSource>,
    headers: Arc<dyn HeaderSource>,
    config: Arc<ExtractorConfig>,
    visitor: OnceLock<ResolvedVisitor>,
    context: OnceLock<Arc<UnifiedContext>>,
}

impl RequestScope {
    pub fn new(
        cookies: Arc<dyn CookieSource>,
        headers: Arc<dyn HeaderSource>,
        config: Arc<ExtractorConfig>,
    ) -> Self {
        Self {
            cookies,
            headers,
            config,
            visitor: OnceLock::new(),
            context: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor().id
    }

    /// True when this request had no visitor id and one was generated.
    pub fn minted_visitor_id(&self) -> bool {
        self.visitor().origin == VisitorOrigin::Generated
    }

    fn visitor(&self) -> &ResolvedVisitor {
        self.visitor.get_or_init(|| {
            resolve_visitor(
                self.cookies.as_ref(),
                self.headers.as_ref(),
                &self.config.visitor_cookie,
                &self.config.visitor_header,
            )
        })
    }

    /// The evaluation context for this request.
    pub fn context(&self) -> Arc<UnifiedContext> {
        self.context
            .get_or_init(|| Arc::new(self.build_context()))
            .clone()
    }

    fn build_context(&self) -> UnifiedContext {
        let visitor_id = self.visitor_id().to_string();
        match try_extract_user(self.cookies.as_ref(), &self.config) {
            Ok(user) => {
                let request = extract_request_context(self.headers.as_ref(), &self.config);
                UnifiedContext::new(user, visitor_id, request)
            }
            Err(err) => {
                tracing::warn!(error = %err, "context extraction failed, using fallback context");
                UnifiedContext::new(UserContext::anonymous(), visitor_id, RequestContext::unknown())
            }
        }
    }
}
