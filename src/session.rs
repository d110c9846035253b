use crate::error::{Error, Result};
use crate::http::{Method, RequestOptions, ResilientClient, Route, Session};
use crate::notify::{Alerter, Severity};
use crate::types::Credentials;
use log::{error, info, warn};
use std::sync::Arc;

const LOGON_PATH: &str = "/Account/LogOn";
const AUTH_PATH: &str = "/Account/LogOn?ReturnUrl=%2f";
const ALERT_SOURCE: &str = "portal-session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// HTTP 503; the only status that warrants a proxy retry.
    Unavailable,
    Status(u16),
    NoResponse,
}

impl Availability {
    fn from_status(status: u16) -> Availability {
        match status {
            200 => Availability::Available,
            503 => Availability::Unavailable,
            other => Availability::Status(other),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Availability::Available => "OK".to_string(),
            Availability::Unavailable => "Service Unavailable (trying with proxy)".to_string(),
            Availability::Status(code) => format!("HTTP {}", code),
            Availability::NoResponse => "No response from server".to_string(),
        }
    }
}

/// Owns the portal session and decides when it has to be recreated.
pub struct SessionManager {
    client: Arc<ResilientClient>,
    base_url: String,
    alerter: Arc<Alerter>,
    max_cycles: u32,
    current: Option<Session>,
    cycles: u32,
}

impl SessionManager {
    pub fn new(
        client: Arc<ResilientClient>,
        base_url: &str,
        alerter: Arc<Alerter>,
        max_cycles: u32,
    ) -> SessionManager {
        SessionManager {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            alerter,
            max_cycles: max_cycles.max(1),
            current: None,
            cycles: 0,
        }
    }

    pub async fn probe(&self, session: &Session, options: RequestOptions) -> Availability {
        let url = format!("{}{}", self.base_url, LOGON_PATH);
        match self
            .client
            .request(Method::Get, &url, Some(session), options)
            .await
        {
            Ok(reply) => {
                let availability = Availability::from_status(reply.status());
                if availability != Availability::Available {
                    warn!("Portal returned {}", availability.message());
                }
                availability
            }
            Err(e) => {
                warn!("Portal probe failed: {}", e);
                Availability::NoResponse
            }
        }
    }

    /// Probes the portal, falls back to the first working proxy on 503 and
    /// logs in. The returned session remembers the route it logged in on.
    pub async fn acquire_session(&self, credentials: &Credentials) -> Result<Session> {
        let session = self.client.new_session()?;
        let options = match self.probe(&session, RequestOptions::default()).await {
            Availability::Available => RequestOptions::default(),
            Availability::Unavailable => {
                if !self.client.has_proxies() {
                    error!("No proxies configured, cannot retry");
                    return Err(Error::NoProxies);
                }
                info!(
                    "Retrying portal through proxy (total proxies: {})",
                    self.client.proxies().len()
                );
                let via = RequestOptions::default().via_proxy(0);
                let url = format!("{}{}", self.base_url, LOGON_PATH);
                let reply = self
                    .client
                    .request(Method::Get, &url, Some(&session), via)
                    .await?;
                if reply.status() != 200 {
                    return Err(Error::Unavailable(format!(
                        "HTTP {} through proxy",
                        reply.status()
                    )));
                }
                match reply.route {
                    Route::Proxy(index) => RequestOptions::default().via_proxy(index),
                    Route::Direct => RequestOptions::default(),
                }
            }
            other => return Err(Error::Unavailable(other.message())),
        };

        let url = format!("{}{}", self.base_url, AUTH_PATH);
        let form = [
            ("username", credentials.login.as_str()),
            ("password", credentials.password.as_str()),
            ("RememberMe", "true"),
        ];
        let reply = match self
            .client
            .request(Method::Post, &url, Some(&session), options.form(form))
            .await
        {
            Ok(reply) => reply,
            Err(_) => return Err(Error::AuthFailed("No response".to_string())),
        };
        if reply.is_error() {
            return Err(Error::AuthFailed(format!("HTTP {}", reply.status())));
        }

        let session = session.with_route(reply.route);
        info!("Portal session created via {:?}", session.route());
        Ok(session)
    }

    /// Returns the session to use for this cycle, logging in again once the
    /// current one has served `max_cycles` cycles or was invalidated.
    pub async fn session_for_cycle(&mut self, credentials: &Credentials) -> Option<Session> {
        if let Some(session) = &self.current {
            if self.cycles < self.max_cycles {
                self.cycles += 1;
                return Some(session.clone());
            }
            info!("Session served {} cycles, logging in again", self.cycles);
        }
        self.current = None;
        self.cycles = 0;

        match self.acquire_session(credentials).await {
            Ok(session) => {
                self.alerter.success(ALERT_SOURCE);
                self.cycles = 1;
                self.current = Some(session.clone());
                Some(session)
            }
            Err(Error::NoProxies) => {
                self.alerter
                    .alert(
                        Severity::Error,
                        "Portal 503 - No Proxies",
                        "Portal returned 503 but PROXY_LIST is empty",
                    )
                    .await;
                None
            }
            Err(e) => {
                error!("Failed to create portal session: {}", e);
                let severity = match e {
                    Error::Unavailable(_) => Severity::Warning,
                    _ => Severity::Error,
                };
                self.alerter
                    .failure(ALERT_SOURCE, severity, "Portal session failed", &e.to_string())
                    .await;
                None
            }
        }
    }

    /// Drops the current session after a failure signal.
    pub fn invalidate(&mut self) {
        if self.current.take().is_some() {
            info!("Portal session invalidated");
        }
        self.cycles = 0;
    }
}
