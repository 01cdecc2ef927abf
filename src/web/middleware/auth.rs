use salvo::http::header::AUTHORIZATION;
use salvo::prelude::*;
use salvo::writing::Scribe;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::web::error::ApiError;

/// Bearer token hoop. A required hoop without a configured token rejects
/// everything; an optional one lets everything through.
pub struct BearerAuth {
    token: Option<SecretString>,
    required: bool,
}

impl BearerAuth {
    pub fn required(token: Option<SecretString>) -> Self {
        Self {
            token,
            required: true,
        }
    }

    pub fn optional(token: Option<SecretString>) -> Self {
        Self {
            token,
            required: false,
        }
    }

    fn allows(&self, req: &Request) -> bool {
        let Some(expected) = &self.token else {
            return !self.required;
        };
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| presented.trim() == expected.expose_secret())
    }
}

#[handler]
impl BearerAuth {
    async fn handle(
        &self,
        req: &mut Request,
        depot: &mut Depot,
        res: &mut Response,
        ctrl: &mut FlowCtrl,
    ) {
        if self.allows(req) {
            ctrl.call_next(req, depot, res).await;
        } else {
            debug!(path = %req.uri().path(), "Rejected unauthenticated request");
            ApiError::Unauthorized.render(res);
            ctrl.skip_rest();
        }
    }
}
