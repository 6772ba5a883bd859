//! Per-user and per-chat rate limiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::error::DispatchResult;
use crate::rate::RateWindowStore;
use crate::state::StateBackend;
use crate::stats::StatsCollector;
use crate::transport::TransportClient;
use crate::update::UpdateContext;

/// Backend scope for distributed per-user counters.
const USER_SCOPE: &str = "rate:user";
/// Backend scope for distributed per-chat counters.
const CHAT_SCOPE: &str = "rate:chat";

/// What happens to an update that exceeds a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// Drop silently.
    #[default]
    Hard,
    /// Send a fixed warning to the chat, then drop.
    Soft,
}

/// Static rate-limit configuration.
///
/// A limit of `None` disables that dimension entirely; its store or
/// counter is never consulted.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Updates allowed per user per window.
    pub per_user: Option<u32>,
    /// Updates allowed per chat per window.
    pub per_chat: Option<u32>,
    /// The sliding (local) or fixed (distributed) window length.
    pub window: Duration,
    /// Hard or soft enforcement.
    pub mode: RateLimitMode,
    /// Warning text sent in soft mode.
    pub warn_text: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_user: None,
            per_chat: None,
            window: Duration::from_secs(60),
            mode: RateLimitMode::Hard,
            warn_text: "You are sending messages too fast. Please slow down.".to_string(),
        }
    }
}

/// Where rate counters live.
pub enum RateLimitBackend {
    /// Process-local sliding-window rings, one store per dimension.
    Local {
        /// Per-user rings; present only when a per-user limit is set.
        users: Option<RateWindowStore<i64>>,
        /// Per-chat rings; present only when a per-chat limit is set.
        chats: Option<RateWindowStore<i64>>,
    },
    /// Fixed-window counters on the shared state backend. Each increment
    /// refreshes the full-window TTL.
    Distributed(Arc<dyn StateBackend>),
}

/// Blocks updates from users or chats that exceed their limit.
///
/// User and chat limits are independent: the user check runs first, and a
/// blocked user does not consume the chat's budget. Blocked updates are
/// counted in the stats and dropped; in soft mode one warning is sent to
/// the chat first. A rate-limited update is not an error.
pub struct RateLimitMiddleware {
    settings: RateLimitSettings,
    backend: RateLimitBackend,
    transport: Option<Arc<dyn TransportClient>>,
    stats: StatsCollector,
}

impl RateLimitMiddleware {
    /// Creates a rate-limit stage with process-local sliding windows.
    pub fn local(
        settings: RateLimitSettings,
        transport: Option<Arc<dyn TransportClient>>,
        stats: StatsCollector,
    ) -> Self {
        let users = settings
            .per_user
            .map(|limit| RateWindowStore::new(limit as usize, settings.window));
        let chats = settings
            .per_chat
            .map(|limit| RateWindowStore::new(limit as usize, settings.window));
        Self {
            settings,
            backend: RateLimitBackend::Local { users, chats },
            transport,
            stats,
        }
    }

    /// Creates a rate-limit stage with fixed-window counters on shared
    /// state.
    pub fn distributed(
        settings: RateLimitSettings,
        backend: Arc<dyn StateBackend>,
        transport: Option<Arc<dyn TransportClient>>,
        stats: StatsCollector,
    ) -> Self {
        Self {
            settings,
            backend: RateLimitBackend::Distributed(backend),
            transport,
            stats,
        }
    }

    /// Checks one dimension; `true` means the update may proceed.
    async fn allow(&self, scope: &str, id: i64, limit: Option<u32>) -> DispatchResult<bool> {
        let Some(limit) = limit else {
            return Ok(true);
        };

        match &self.backend {
            RateLimitBackend::Local { users, chats } => {
                let store = if scope == USER_SCOPE { users } else { chats };
                // The store exists whenever the limit does.
                Ok(store.as_ref().is_none_or(|s| s.try_acquire(id)))
            }
            RateLimitBackend::Distributed(backend) => {
                let count = backend
                    .increment(scope, &id.to_string(), 1, Some(self.settings.window))
                    .await?;
                Ok(count <= i64::from(limit))
            }
        }
    }

    async fn reject(&self, ctx: &UpdateContext, scope: &str) {
        debug!(
            update_id = %ctx.update_id(),
            chat = %ctx.chat(),
            user = %ctx.user(),
            scope,
            "update rate limited"
        );
        self.stats.record_rate_limited();

        if self.settings.mode == RateLimitMode::Soft {
            if let Some(transport) = &self.transport {
                if let Err(err) = transport
                    .send_text(ctx.chat(), &self.settings.warn_text, ctx.cancellation())
                    .await
                {
                    warn!(chat = %ctx.chat(), error = %err, "failed to send rate-limit warning");
                }
            }
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(&self, ctx: UpdateContext, next: Next<'_>) -> DispatchResult<()> {
        if !self
            .allow(USER_SCOPE, ctx.user().0, self.settings.per_user)
            .await?
        {
            self.reject(&ctx, USER_SCOPE).await;
            return Ok(());
        }

        if !self
            .allow(CHAT_SCOPE, ctx.chat().0, self.settings.per_chat)
            .await?
        {
            self.reject(&ctx, CHAT_SCOPE).await;
            return Ok(());
        }

        next.run(ctx).await
    }
}
