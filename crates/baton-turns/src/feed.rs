//! Change feed
//!
//! Each subscription is one spawned polling task bound to a cancellation
//! token. The task holds process-local cursors over the event log, the join
//! stream, the turn state and the derived views; every tick it diffs them
//! against the store, pushes one typed message per changed category followed
//! by a single `Refresh`, and sends a heartbeat frame after a quiet
//! keep-alive interval. Ticks also drive the watchdog and continuity checks,
//! each throttled through the store.
//!
//! Pushed payloads are hints. Clients fetch `TurnHandler::session_snapshot`
//! for the authoritative state.

use crate::continuity::ContinuityManager;
use crate::gauge::{ConnectionGauge, ConnectionGuard};
use crate::watchdog::TurnWatchdog;
use baton_core::effects::TurnEffects;
use baton_core::{
    BatonConfig, BatonError, DerivedKind, Event, EventCursor, FeedConfig, JoinCursor, Membership,
    ParticipantId, PhysicalTime, Result, SessionId, TurnState,
};
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Typed message pushed to an observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedMessage {
    /// First message of every subscription
    #[serde(rename_all = "camelCase")]
    Ping {
        session_id: SessionId,
        turn_index: u64,
    },
    EventPosted { events: Vec<Event> },
    MemberJoined { members: Vec<Membership> },
    TurnAssigned {
        turn: TurnState,
        holder: ParticipantId,
    },
    #[serde(rename_all = "camelCase")]
    SummaryUpdated { updated_at: PhysicalTime },
    #[serde(rename_all = "camelCase")]
    CharactersUpdated { updated_at: PhysicalTime },
    /// Something changed this tick; refetch the snapshot
    Refresh,
    Error { code: String, message: String },
}

impl FeedMessage {
    fn error(err: &BatonError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Frame on the wire
///
/// Heartbeats only keep intermediaries from closing an idle channel; clients
/// ignore them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    Message(FeedMessage),
    Heartbeat,
}

impl FeedFrame {
    /// The message, unless this is a heartbeat
    pub fn message(&self) -> Option<&FeedMessage> {
        match self {
            FeedFrame::Message(message) => Some(message),
            FeedFrame::Heartbeat => None,
        }
    }
}

/// Receiving end of one observer's channel
///
/// Dropping it cancels the polling task.
#[derive(Debug)]
pub struct FeedSubscription {
    receiver: mpsc::Receiver<FeedFrame>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    /// Next frame, or `None` once the feed has stopped
    pub async fn recv(&mut self) -> Option<FeedFrame> {
        self.receiver.recv().await
    }

    /// Whether the feed was cancelled by the client or a teardown
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the polling task to release its resources
    pub async fn close(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "feed task ended abnormally");
            }
        }
    }
}

impl Stream for FeedSubscription {
    type Item = FeedFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedFrame>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Last observed position in every change stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FeedCursors {
    event: Option<EventCursor>,
    join: Option<JoinCursor>,
    turn: Option<(PhysicalTime, u64)>,
    summary: Option<PhysicalTime>,
    characters: Option<PhysicalTime>,
}

impl FeedCursors {
    /// Cursors at the current end of every stream
    async fn capture<E>(effects: &E, session_id: &SessionId) -> Result<(Self, u64)>
    where
        E: TurnEffects + ?Sized,
    {
        let turn = effects
            .turn_state(session_id)
            .await?
            .ok_or_else(|| BatonError::not_found(format!("session not found: {session_id}")))?;
        let cursors = Self {
            event: effects
                .latest_events(session_id, 1)
                .await?
                .last()
                .map(Event::cursor),
            join: effects
                .members(session_id)
                .await?
                .iter()
                .map(Membership::join_cursor)
                .max(),
            turn: Some((turn.updated_at, turn.turn_index)),
            summary: effects
                .derived_updated_at(session_id, DerivedKind::Summary)
                .await?,
            characters: effects
                .derived_updated_at(session_id, DerivedKind::Characters)
                .await?,
        };
        Ok((cursors, turn.turn_index))
    }

    /// Advance every cursor, returning one message per changed stream
    ///
    /// Cursors only move when every read succeeded, so a failed tick is
    /// replayed in full on the next one.
    async fn diff<E>(
        &mut self,
        effects: &E,
        session_id: &SessionId,
        batch_limit: usize,
    ) -> Result<Vec<FeedMessage>>
    where
        E: TurnEffects + ?Sized,
    {
        let mut next = self.clone();
        let messages = next.advance(effects, session_id, batch_limit).await?;
        *self = next;
        Ok(messages)
    }

    async fn advance<E>(
        &mut self,
        effects: &E,
        session_id: &SessionId,
        batch_limit: usize,
    ) -> Result<Vec<FeedMessage>>
    where
        E: TurnEffects + ?Sized,
    {
        let session = effects
            .session(session_id)
            .await?
            .ok_or_else(|| BatonError::not_found(format!("session not found: {session_id}")))?;
        let mut messages = Vec::new();

        let events = effects
            .events_after(session_id, self.event, batch_limit)
            .await?;
        if let Some(last) = events.last() {
            self.event = Some(last.cursor());
            messages.push(FeedMessage::EventPosted { events });
        }

        let mut joined: Vec<Membership> = effects
            .members(session_id)
            .await?
            .into_iter()
            .filter(|m| Some(m.join_cursor()) > self.join)
            .collect();
        joined.sort_by_key(Membership::join_cursor);
        if let Some(last) = joined.last() {
            self.join = Some(last.join_cursor());
            messages.push(FeedMessage::MemberJoined { members: joined });
        }

        if let Some(turn) = effects.turn_state(session_id).await? {
            let position = Some((turn.updated_at, turn.turn_index));
            if position > self.turn {
                self.turn = position;
                messages.push(FeedMessage::TurnAssigned {
                    holder: turn.effective_holder(session.privileged),
                    turn,
                });
            }
        }

        let summary = effects
            .derived_updated_at(session_id, DerivedKind::Summary)
            .await?;
        if summary > self.summary {
            self.summary = summary;
            if let Some(updated_at) = summary {
                messages.push(FeedMessage::SummaryUpdated { updated_at });
            }
        }

        let characters = effects
            .derived_updated_at(session_id, DerivedKind::Characters)
            .await?;
        if characters > self.characters {
            self.characters = characters;
            if let Some(updated_at) = characters {
                messages.push(FeedMessage::CharactersUpdated { updated_at });
            }
        }

        Ok(messages)
    }
}

/// Shared pieces every feed task needs
struct FeedContext<E: ?Sized> {
    effects: Arc<E>,
    config: FeedConfig,
    watchdog: TurnWatchdog,
    continuity: ContinuityManager,
}

impl<E: ?Sized> Clone for FeedContext<E> {
    fn clone(&self) -> Self {
        Self {
            effects: Arc::clone(&self.effects),
            config: self.config.clone(),
            watchdog: self.watchdog.clone(),
            continuity: self.continuity.clone(),
        }
    }
}

/// One observer's outbound side
struct FeedChannel {
    sender: mpsc::Sender<FeedFrame>,
    token: CancellationToken,
    last_sent: Instant,
}

impl FeedChannel {
    /// Send unless cancelled; `false` means the feed must stop
    async fn send(&mut self, frame: FeedFrame) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let sent = tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            result = self.sender.send(frame) => result.is_ok(),
        };
        if sent {
            self.last_sent = Instant::now();
        }
        sent
    }
}

/// Parent token of one session's feeds and how many are still running
struct SessionFeeds {
    parent: CancellationToken,
    generation: u64,
    subscribers: usize,
}

#[derive(Default)]
struct FeedRegistry {
    sessions: HashMap<SessionId, SessionFeeds>,
    next_generation: u64,
}

impl SessionFeeds {
    fn new(generation: u64) -> Self {
        Self {
            parent: CancellationToken::new(),
            generation,
            subscribers: 0,
        }
    }
}

impl FeedRegistry {
    /// Child token for a new subscription, plus the generation it belongs to
    fn enlist(&mut self, session_id: SessionId) -> (CancellationToken, u64) {
        let FeedRegistry {
            sessions,
            next_generation,
        } = self;
        let mut fresh = || {
            *next_generation += 1;
            SessionFeeds::new(*next_generation)
        };
        let feeds = sessions.entry(session_id).or_insert_with(&mut fresh);
        if feeds.parent.is_cancelled() {
            *feeds = fresh();
        }
        feeds.subscribers += 1;
        (feeds.parent.child_token(), feeds.generation)
    }

    /// Forget a finished subscription; the entry goes with the last one
    fn release(&mut self, session_id: &SessionId, generation: u64) {
        let Some(feeds) = self.sessions.get_mut(session_id) else {
            return;
        };
        // A teardown may have replaced the entry since this feed started.
        if feeds.generation != generation {
            return;
        }
        feeds.subscribers = feeds.subscribers.saturating_sub(1);
        if feeds.subscribers == 0 {
            self.sessions.remove(session_id);
        }
    }
}

/// Releases a subscription's registry slot when its task ends
struct RegistrySlot {
    registry: Arc<Mutex<FeedRegistry>>,
    session_id: SessionId,
    generation: u64,
}

impl Drop for RegistrySlot {
    fn drop(&mut self) {
        self.registry
            .lock()
            .release(&self.session_id, self.generation);
    }
}

/// Process-wide registry of feed tasks
///
/// Session teardown cancels the parent token of a session, which cancels
/// every subscription's child token at once. A session's entry is dropped
/// as soon as its last feed ends.
pub struct SessionFeedHub<E: ?Sized> {
    context: FeedContext<E>,
    gauge: ConnectionGauge,
    registry: Arc<Mutex<FeedRegistry>>,
}

impl<E: ?Sized> std::fmt::Debug for SessionFeedHub<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFeedHub")
            .field("open_connections", &self.gauge.current())
            .field("sessions", &self.registry.lock().sessions.len())
            .finish_non_exhaustive()
    }
}

impl<E> SessionFeedHub<E>
where
    E: TurnEffects + ?Sized + 'static,
{
    pub fn new(effects: Arc<E>, config: &BatonConfig) -> Self {
        Self {
            context: FeedContext {
                effects,
                config: config.feed.clone(),
                watchdog: TurnWatchdog::new(config.watchdog.clone()),
                continuity: ContinuityManager::new(config.continuity.clone()),
            },
            gauge: ConnectionGauge::new(),
            registry: Arc::new(Mutex::new(FeedRegistry::default())),
        }
    }

    /// Feed connections currently open in this process
    pub fn open_connections(&self) -> usize {
        self.gauge.current()
    }

    /// Sessions with at least one running feed in this process
    pub fn tracked_sessions(&self) -> usize {
        self.registry.lock().sessions.len()
    }

    /// Open a feed for a session member
    pub async fn subscribe(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<FeedSubscription> {
        let effects = &*self.context.effects;
        if effects.session(&session_id).await?.is_none() {
            return Err(BatonError::not_found(format!(
                "session not found: {session_id}"
            )));
        }
        if !effects
            .members(&session_id)
            .await?
            .iter()
            .any(|m| m.participant_id == participant_id)
        {
            return Err(BatonError::forbidden("not a member of this session"));
        }

        let (token, generation) = self.registry.lock().enlist(session_id);
        let slot = RegistrySlot {
            registry: Arc::clone(&self.registry),
            session_id,
            generation,
        };

        let (sender, receiver) = mpsc::channel(self.context.config.channel_capacity);
        let channel = FeedChannel {
            sender,
            token: token.clone(),
            last_sent: Instant::now(),
        };
        let guard = self.gauge.acquire();
        let task = tokio::spawn(run_feed(
            self.context.clone(),
            session_id,
            channel,
            (guard, slot),
        ));

        tracing::debug!(session_id = %session_id, participant_id = %participant_id, "feed opened");
        Ok(FeedSubscription {
            receiver,
            token,
            task: Some(task),
        })
    }

    /// Stop every feed of a session
    pub fn teardown(&self, session_id: &SessionId) {
        if let Some(feeds) = self.registry.lock().sessions.remove(session_id) {
            feeds.parent.cancel();
            tracing::debug!(session_id = %session_id, "session feeds torn down");
        }
    }
}

async fn run_feed<E>(
    context: FeedContext<E>,
    session_id: SessionId,
    mut channel: FeedChannel,
    _resources: (ConnectionGuard, RegistrySlot),
) where
    E: TurnEffects + ?Sized,
{
    let effects = &*context.effects;
    let (mut cursors, turn_index) = match FeedCursors::capture(effects, &session_id).await {
        Ok(captured) => captured,
        Err(err) => {
            channel
                .send(FeedFrame::Message(FeedMessage::error(&err)))
                .await;
            return;
        }
    };
    if !channel
        .send(FeedFrame::Message(FeedMessage::Ping {
            session_id,
            turn_index,
        }))
        .await
    {
        return;
    }

    let tick = context.config.tick();
    let keepalive = context.config.keepalive();
    loop {
        tokio::select! {
            biased;
            _ = channel.token.cancelled() => break,
            _ = tokio::time::sleep(tick) => {}
        }

        if let Err(err) = context
            .watchdog
            .sweep_session_if_due(effects, &session_id)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %err, "opportunistic watchdog sweep failed");
        }
        if let Err(err) = context
            .continuity
            .check_if_due(effects, &session_id)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %err, "opportunistic continuity check failed");
        }

        match cursors
            .diff(effects, &session_id, context.config.event_batch_limit)
            .await
        {
            Ok(messages) if messages.is_empty() => {}
            Ok(messages) => {
                for message in messages {
                    if !channel.send(FeedFrame::Message(message)).await {
                        return;
                    }
                }
                if !channel.send(FeedFrame::Message(FeedMessage::Refresh)).await {
                    return;
                }
            }
            Err(err @ BatonError::NotFound { .. }) => {
                channel
                    .send(FeedFrame::Message(FeedMessage::error(&err)))
                    .await;
                break;
            }
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "feed diff failed");
                if !channel.send(FeedFrame::Message(FeedMessage::error(&err))).await {
                    return;
                }
            }
        }

        if channel.last_sent.elapsed() >= keepalive && !channel.send(FeedFrame::Heartbeat).await {
            return;
        }
    }
    tracing::debug!(session_id = %session_id, "feed closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_use_camel_case_tags() {
        let json = serde_json::to_value(FeedMessage::SummaryUpdated {
            updated_at: PhysicalTime::from_millis(5),
        })
        .unwrap();
        assert_eq!(json["type"], "summaryUpdated");
        assert_eq!(json["updatedAt"]["ts_ms"], 5);

        let json = serde_json::to_value(FeedMessage::Refresh).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "refresh" }));

        let err = BatonError::not_found("gone");
        let json = serde_json::to_value(FeedMessage::error(&err)).unwrap();
        assert_eq!(json["code"], "not_found");
    }

    #[test]
    fn registry_entry_lives_as_long_as_its_feeds() {
        let mut registry = FeedRegistry::default();
        let sid = SessionId::new_random();

        let (first, generation) = registry.enlist(sid);
        let (_, same) = registry.enlist(sid);
        assert_eq!(generation, same);

        registry.release(&sid, generation);
        assert_eq!(registry.sessions.len(), 1);
        registry.release(&sid, generation);
        assert!(registry.sessions.is_empty());
        assert!(!first.is_cancelled());

        let (_, newer) = registry.enlist(sid);
        assert_ne!(newer, generation);
        registry.release(&sid, generation);
        assert_eq!(registry.sessions.len(), 1);
    }
}
