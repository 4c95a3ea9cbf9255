use std::sync::Arc;

use animus_core::{AnimusError, Result};
use animus_store::Store;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Decides which soul a chat turn (or a reporting terminal) speaks for.
///
/// Resolution order: existing binding → explicit hint (id or name) →
/// the user's only soul. Souls are never created here — an unresolvable
/// request fails fast so the UI can prompt for creation or selection.
pub struct SoulResolver {
    store: Arc<Store>,
}

impl SoulResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn resolve(
        &self,
        user_id: &str,
        terminal_id: &str,
        soul_hint: Option<&str>,
    ) -> Result<String> {
        self.store.ensure_user(user_id)?;

        if let Some(binding) = self.store.get_binding(user_id, terminal_id)? {
            self.store.touch_binding(user_id, terminal_id)?;
            debug!(user_id, terminal_id, soul_id = %binding.soul_id, "binding hit");
            return Ok(binding.soul_id);
        }

        let souls = self.store.list_souls(user_id)?;
        if souls.is_empty() {
            return Err(AnimusError::SoulNotFound {
                user_id: user_id.to_string(),
                hint: soul_hint.unwrap_or("").to_string(),
            });
        }

        if let Some(hint) = soul_hint.map(str::trim).filter(|h| !h.is_empty()) {
            let Some(soul) = self.store.find_soul_by_hint(user_id, hint)? else {
                return Err(AnimusError::SoulNotFound {
                    user_id: user_id.to_string(),
                    hint: hint.to_string(),
                });
            };
            self.store.bind_terminal(user_id, terminal_id, &soul.soul_id)?;
            info!(user_id, terminal_id, soul_id = %soul.soul_id, hint, "bound by hint");
            return Ok(soul.soul_id);
        }

        if souls.len() == 1 {
            let soul_id = souls[0].soul_id.clone();
            self.store.bind_terminal(user_id, terminal_id, &soul_id)?;
            info!(user_id, terminal_id, soul_id = %soul_id, "bound the user's only soul");
            return Ok(soul_id);
        }

        Err(AnimusError::SoulSelectionRequired {
            user_id: user_id.to_string(),
            count: souls.len(),
        })
    }
}

/// Lets the MQTT hub's inbound `skills` handler resolve (and auto-bind)
/// the reporting terminal's soul.
#[async_trait]
impl animus_mqtt::SoulBinder for SoulResolver {
    async fn resolve_soul(
        &self,
        terminal_id: &str,
        user_id: Option<&str>,
        soul_id: Option<&str>,
    ) -> Option<String> {
        // Explicit soul in the report wins; bind it when the user is known.
        if let Some(sid) = soul_id {
            match self.store.get_soul(sid) {
                Ok(Some(soul)) => {
                    let uid = user_id.unwrap_or(&soul.user_id).to_string();
                    if let Err(e) = self.store.bind_terminal(&uid, terminal_id, sid) {
                        warn!(terminal_id, soul_id = sid, error = %e, "skill report bind failed");
                    }
                    return Some(sid.to_string());
                }
                Ok(None) => {
                    warn!(terminal_id, soul_id = sid, "skill report names unknown soul");
                }
                Err(e) => {
                    warn!(terminal_id, error = %e, "soul lookup failed");
                    return None;
                }
            }
        }

        let uid = user_id?;
        match self.resolve(uid, terminal_id, None) {
            Ok(sid) => Some(sid),
            Err(e) => {
                debug!(terminal_id, user_id = uid, error = %e, "terminal soul unresolved");
                None
            }
        }
    }
}
