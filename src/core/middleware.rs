use crate::core::Session;
use http::Extensions;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};

/// Appends the project's web API key to every request, as the Identity
/// Toolkit endpoints expect (`?key=...`).
#[derive(Clone)]
pub struct ApiKeyMiddleware {
    api_key: String,
}

impl ApiKeyMiddleware {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for ApiKeyMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair("key", &self.api_key);

        next.run(req, extensions).await
    }
}

/// Where the signed-in user's id token goes on an outgoing request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenPlacement {
    /// `Authorization: <scheme> <token>` (Firestore uses `Bearer`, Storage `Firebase`).
    Header(&'static str),
    /// A query parameter (the Realtime Database REST API reads `?auth=`).
    Query(&'static str),
}

/// Attaches the current session's id token. Requests go out unauthenticated
/// while nobody is signed in, so public security rules still apply.
#[derive(Clone)]
pub struct IdTokenMiddleware {
    session: Session,
    placement: TokenPlacement,
}

impl IdTokenMiddleware {
    pub fn new(session: Session, placement: TokenPlacement) -> Self {
        Self { session, placement }
    }
}

#[async_trait::async_trait]
impl Middleware for IdTokenMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if let Some(token) = self.session.fresh_id_token().await {
            match self.placement {
                TokenPlacement::Header(scheme) => {
                    let value = header::HeaderValue::from_str(&format!("{} {}", scheme, token))
                        .map_err(|e| {
                            reqwest_middleware::Error::Middleware(anyhow::anyhow!(
                                "Invalid id token header: {}",
                                e
                            ))
                        })?;
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                }
                TokenPlacement::Query(param) => {
                    req.url_mut().query_pairs_mut().append_pair(param, &token);
                }
            }
        }

        next.run(req, extensions).await
    }
}
