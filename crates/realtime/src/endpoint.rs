//! Realtime endpoint derivation.
//!
//! The realtime base address is never configured directly; it is derived
//! from the REST base the application already has (`https` becomes `wss`,
//! `http` becomes `ws`). Connection URLs are rebuilt from scratch for every
//! connect attempt so the auth token and cache-busting timestamp are always
//! fresh.

use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;

use crate::session::SessionStore;

/// Derives realtime connection URLs from the REST base address.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    api_base: String,
    host_hint: Option<String>,
}

impl EndpointResolver {
    /// `api_base` is the REST base address, e.g. `https://api.example.com`.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            host_hint: None,
        }
    }

    /// Sets the externally visible hostname of the embedding context.
    ///
    /// When the derived address points at the generic `localhost` but the
    /// application itself is reachable under a concrete name, some proxy
    /// setups only forward the loopback IP; the hint opts in to substituting
    /// `127.0.0.1`. Without a hint the derived address is used untouched.
    pub fn with_host_hint(mut self, hint: impl Into<String>) -> Self {
        self.host_hint = Some(hint.into());
        self
    }

    /// The realtime base: scheme-translated and loopback-substituted.
    pub fn realtime_base(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        let derived = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        self.substitute_loopback(derived)
    }

    /// Connection URL for a chat channel.
    pub fn chat_url(&self, channel_key: &str, session: &dyn SessionStore) -> String {
        let path = format!("/ws/chat/{}", urlencoding::encode(channel_key));
        self.connection_url(&path, session)
    }

    /// Connection URL for the notifications channel.
    pub fn notifications_url(&self, session: &dyn SessionStore) -> String {
        self.connection_url("/ws/notifications", session)
    }

    fn connection_url(&self, path: &str, session: &dyn SessionStore) -> String {
        let mut url = format!("{}{}", self.realtime_base(), path);
        if let Some(token) = session.token() {
            append_query(&mut url, "token", &token);
        }
        if let Some(user) = session.stored_user() {
            append_query(&mut url, "userId", &user.id);
        }
        append_query(&mut url, "ts", &now_millis().to_string());
        url
    }

    fn substitute_loopback(&self, derived: String) -> String {
        match self.host_hint.as_deref() {
            Some(hint) if hint != "localhost" => {}
            _ => return derived,
        }
        let Ok(mut url) = Url::parse(&derived) else {
            return derived;
        };
        if url.host_str() == Some("localhost") && url.set_host(Some("127.0.0.1")).is_ok() {
            return url.to_string().trim_end_matches('/').to_string();
        }
        derived
    }
}

fn append_query(url: &mut String, key: &str, value: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(key);
    url.push('=');
    url.push_str(&urlencoding::encode(value));
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
