//! Account authentication against the RightScale API.
//!
//! Three flows, chosen by the account's [`Credentials`]:
//!
//! - **Refresh token**: `POST /api/oauth2` exchanges the long-lived token for a short-lived
//!   bearer access token.
//! - **Password**: `POST /api/session` logs in; the API answers with a session cookie kept by the
//!   client's cookie store.
//! - **Instance token**: `POST /api/session/instance`, likewise cookie based.
//!
//! The resulting [`Session`] decorates every later request.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::{
    config::{API_VERSION, AccountConfig, Credentials, TOKEN_EXCHANGE_TIMEOUT},
    error::{Result, RightScaleError},
};

/// Header carrying the API version.
pub(crate) const API_VERSION_HEADER: &str = "X-API-Version";

/// An authenticated session for one account.
pub(crate) enum Session {
    /// Requests carry `Authorization: Bearer <token>`.
    Bearer(Zeroizing<String>),
    /// The client's cookie store carries the session.
    Cookie,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Self::Cookie => f.write_str("Cookie"),
        }
    }
}

impl Session {
    /// Adds the API version header and, for bearer sessions, the token.
    pub(crate) fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(API_VERSION_HEADER, API_VERSION);
        match self {
            Self::Bearer(token) => request.bearer_auth(token.as_str()),
            Self::Cookie => request,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Authenticates `config`'s account with whichever credential it carries.
#[tracing::instrument(
    skip(http, config),
    fields(account = %config.account_id, method = config.credentials.kind())
)]
pub(crate) async fn authenticate(http: &Client, config: &AccountConfig) -> Result<Session> {
    let account_href = config.account_href();
    let session = match &config.credentials {
        Credentials::RefreshToken(token) => {
            Session::Bearer(exchange_refresh_token(http, config, token).await?)
        },
        Credentials::Password { email, password } => {
            let form = [
                ("email", email.as_str()),
                ("password", password.as_str()),
                ("account_href", account_href.as_str()),
            ];
            login(http, config, "/api/session", &form).await?;
            Session::Cookie
        },
        Credentials::InstanceToken(token) => {
            let form =
                [("instance_token", token.as_str()), ("account_href", account_href.as_str())];
            login(http, config, "/api/session/instance", &form).await?;
            Session::Cookie
        },
    };

    tracing::info!("authenticated with RightScale");
    Ok(session)
}

/// Exchanges a refresh token for an access token.
///
/// Any status other than 200 is a hard [`RightScaleError::TokenExchange`]
/// failure and is not retried.
async fn exchange_refresh_token(
    http: &Client,
    config: &AccountConfig,
    refresh_token: &str,
) -> Result<Zeroizing<String>> {
    let url = config.endpoint("/api/oauth2")?;
    let response = http
        .post(url)
        .header(API_VERSION_HEADER, API_VERSION)
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
        .timeout(TOKEN_EXCHANGE_TIMEOUT)
        .send()
        .await?;

    let status = response.status();
    if status != StatusCode::OK {
        tracing::warn!(status = status.as_u16(), "token exchange rejected");
        return Err(RightScaleError::TokenExchange {
            account: config.account_id.clone(),
            message: format!("HTTP {}", status.as_u16()),
        });
    }

    let body: TokenResponse = response.json().await?;
    match body.access_token {
        Some(token) if !token.is_empty() => Ok(Zeroizing::new(token)),
        _ => Err(RightScaleError::TokenExchange {
            account: config.account_id.clone(),
            message: "response carried no access_token".into(),
        }),
    }
}

async fn login(
    http: &Client,
    config: &AccountConfig,
    path: &str,
    form: &[(&str, &str)],
) -> Result<()> {
    let url = config.endpoint(path)?;
    let response = http
        .post(url)
        .header(API_VERSION_HEADER, API_VERSION)
        .form(form)
        .timeout(config.search_timeout)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RightScaleError::Authentication {
            account: config.account_id.clone(),
            message: format!("login rejected with HTTP {}", status.as_u16()),
        });
    }
    Err(RightScaleError::Status {
        operation: "login",
        account: config.account_id.clone(),
        status: status.as_u16(),
    })
}
