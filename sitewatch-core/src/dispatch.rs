use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::RateLimitSettings;
use crate::error::{DispatchError, TransportError};
use crate::rate_limit::RateLimiter;

/// Sends one text message to one recipient.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), TransportError>;
}

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub author: String,
    pub time: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub attempted: usize,
}

/// Single pass, so placeholders appearing inside substituted values stay
/// literal. Unknown `{...}` sequences are copied through.
pub fn render(template: &str, n: &Notification) -> String {
    let mut out = String::with_capacity(template.len() + 128);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let field = tail.find('}').and_then(|close| {
            let value = match &tail[1..close] {
                "title" => &n.title,
                "author" => &n.author,
                "time" => &n.time,
                "url" => &n.url,
                _ => return None,
            };
            Some((value, close))
        });
        match field {
            Some((value, close)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(),
        }
    }

    /// Fans `message` out to every recipient. Per-recipient failures are
    /// logged and counted in the report; only the rate limit fails the call.
    pub async fn dispatch(
        &self,
        message: &str,
        recipients: &BTreeSet<String>,
        rate_limit: &RateLimitSettings,
    ) -> Result<DispatchReport, DispatchError> {
        if !self.limiter.try_acquire(rate_limit).await {
            return Err(DispatchError::RateLimited {
                max_per_minute: rate_limit.max_per_minute,
            });
        }
        if recipients.is_empty() {
            warn!("no recipients configured, nothing sent");
        }

        let mut sent = 0;
        for recipient in recipients {
            match self.transport.send_text(recipient, message).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(recipient = %recipient, error = %e, "delivery failed"),
            }
        }
        let attempted = recipients.len();
        if sent == 0 && attempted > 0 {
            warn!(attempted, "delivery failed for every recipient");
        } else {
            info!(sent, attempted, "notification dispatched");
        }
        Ok(DispatchReport { sent, attempted })
    }
}
