//! Presence hub.
//!
//! Each channel keeps its tracked members, the keys currently typing and a
//! `watch` sender holding the latest snapshot. Every mutation replaces that
//! snapshot, so subscribers observe last-write-wins state: a slow reader
//! skips intermediate versions and only sees the newest one.

use crate::services::metrics::record_presence_event;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// What a member publishes about itself when it joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMeta {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMember {
    pub key: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub online_at: DateTime<Utc>,
}

/// Full state of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub channel: String,
    /// Increases by one per mutation of the channel.
    pub version: u64,
    pub members: Vec<PresenceMember>,
    /// Keys currently typing, sorted.
    pub typing: Vec<String>,
}

impl PresenceSnapshot {
    fn empty(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            version: 0,
            members: Vec::new(),
            typing: Vec::new(),
        }
    }
}

struct ChannelState {
    members: BTreeMap<String, PresenceMember>,
    /// Key to typing expiry.
    typing: BTreeMap<String, Instant>,
    version: u64,
    sender: watch::Sender<PresenceSnapshot>,
}

impl ChannelState {
    fn new(channel: &str) -> Self {
        let (sender, _) = watch::channel(PresenceSnapshot::empty(channel));
        Self {
            members: BTreeMap::new(),
            typing: BTreeMap::new(),
            version: 0,
            sender,
        }
    }

    fn build_snapshot(&self, channel: &str, now: Instant) -> PresenceSnapshot {
        PresenceSnapshot {
            channel: channel.to_string(),
            version: self.version,
            members: self.members.values().cloned().collect(),
            typing: self
                .typing
                .iter()
                .filter(|(_, expires_at)| **expires_at > now)
                .map(|(key, _)| key.clone())
                .collect(),
        }
    }

    fn publish(&mut self, channel: &str, now: Instant) {
        self.version += 1;
        let snapshot = self.build_snapshot(channel, now);
        self.sender.send_replace(snapshot);
    }

    fn is_idle(&self) -> bool {
        self.members.is_empty() && self.typing.is_empty() && self.sender.receiver_count() == 0
    }
}

/// Shared presence state. Cheap to clone.
#[derive(Clone)]
pub struct PresenceHub {
    channels: Arc<DashMap<String, ChannelState>>,
    typing_ttl: Duration,
}

impl PresenceHub {
    pub fn new(typing_ttl: Duration) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            typing_ttl,
        }
    }

    /// Join `channel` as `key`, or update the member's meta.
    pub fn track(&self, channel: &str, key: &str, meta: PresenceMeta) -> PresenceSnapshot {
        let now = Instant::now();
        let mut state = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelState::new(channel));

        let online_at = state
            .members
            .get(key)
            .map(|existing| existing.online_at)
            .unwrap_or_else(Utc::now);
        state.members.insert(
            key.to_string(),
            PresenceMember {
                key: key.to_string(),
                status: meta.status,
                metadata: meta.metadata,
                online_at,
            },
        );
        state.publish(channel, now);
        record_presence_event("track");
        debug!(channel, key, "Presence tracked");

        state.build_snapshot(channel, now)
    }

    /// Leave `channel`. Also clears the key's typing flag.
    pub fn untrack(&self, channel: &str, key: &str) -> PresenceSnapshot {
        let now = Instant::now();
        let snapshot = match self.channels.get_mut(channel) {
            Some(mut state) => {
                let removed = state.members.remove(key).is_some();
                let was_typing = state.typing.remove(key).is_some();
                if removed || was_typing {
                    state.publish(channel, now);
                    record_presence_event("untrack");
                }
                state.build_snapshot(channel, now)
            }
            None => return PresenceSnapshot::empty(channel),
        };

        self.drop_if_idle(channel);
        snapshot
    }

    pub fn set_typing(&self, channel: &str, key: &str, is_typing: bool) -> PresenceSnapshot {
        self.set_typing_at(channel, key, is_typing, Instant::now())
    }

    fn set_typing_at(
        &self,
        channel: &str,
        key: &str,
        is_typing: bool,
        now: Instant,
    ) -> PresenceSnapshot {
        if !is_typing && !self.channels.contains_key(channel) {
            return PresenceSnapshot::empty(channel);
        }

        let snapshot = {
            let mut state = self
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| ChannelState::new(channel));

            let changed = if is_typing {
                state
                    .typing
                    .insert(key.to_string(), now + self.typing_ttl)
                    .map_or(true, |previous| previous <= now)
            } else {
                state.typing.remove(key).is_some()
            };
            if changed {
                state.publish(channel, now);
                record_presence_event(if is_typing { "typing_start" } else { "typing_stop" });
            }
            state.build_snapshot(channel, now)
        };

        if !is_typing {
            self.drop_if_idle(channel);
        }
        snapshot
    }

    pub fn snapshot(&self, channel: &str) -> PresenceSnapshot {
        self.channels
            .get(channel)
            .map(|state| state.build_snapshot(channel, Instant::now()))
            .unwrap_or_else(|| PresenceSnapshot::empty(channel))
    }

    /// Stream of snapshots, starting with the current one.
    pub fn subscribe(&self, channel: &str) -> WatchStream<PresenceSnapshot> {
        let state = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelState::new(channel));
        WatchStream::new(state.sender.subscribe())
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// Clear typing flags that expired by `now` and drop idle channels.
    /// Returns how many typing flags were cleared.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut cleared = 0;
        for mut entry in self.channels.iter_mut() {
            let before = entry.typing.len();
            entry.typing.retain(|_, expires_at| *expires_at > now);
            let expired = before - entry.typing.len();
            if expired > 0 {
                cleared += expired;
                let channel = entry.key().clone();
                entry.publish(&channel, now);
            }
        }
        self.channels.retain(|_, state| !state.is_idle());

        if cleared > 0 {
            record_presence_event("typing_expired");
            debug!(cleared, "Expired typing indicators cleared");
        }
        cleared
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `period`.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                hub.sweep_expired();
            }
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn drop_if_idle(&self, channel: &str) {
        self.channels.remove_if(channel, |_, state| state.is_idle());
    }
}
