//! Session fixture on a simulated clock

use crate::ids::participant;
use baton_core::effects::{MembershipEffects, TurnStateEffects};
use baton_core::{BatonConfig, EventKind, Membership, ParticipantId, Result, SessionId, TurnState};
use baton_effects::{BatonEffectSystem, SimulatedTimeHandler};
use baton_turns::{ActionAccepted, SessionSnapshot, TurnHandler};
use std::sync::Arc;

/// Effect system used by every fixture
pub type TestEffects = BatonEffectSystem<SimulatedTimeHandler>;

/// Builder for `SessionFixture`
#[derive(Debug, Clone)]
pub struct SessionFixtureBuilder {
    standard: u128,
    start_ms: u64,
    join_spacing_ms: u64,
    config: BatonConfig,
}

impl Default for SessionFixtureBuilder {
    fn default() -> Self {
        Self {
            standard: 1,
            start_ms: 1_000_000,
            join_spacing_ms: 1,
            config: BatonConfig::default(),
        }
    }
}

impl SessionFixtureBuilder {
    /// Number of standard participants (`participant(2)` onwards)
    pub fn standard(mut self, count: u128) -> Self {
        self.standard = count;
        self
    }

    /// Clock value at session creation
    pub fn start_ms(mut self, start_ms: u64) -> Self {
        self.start_ms = start_ms;
        self
    }

    /// Clock advance between successive joins; zero makes every join time
    /// collide so ids break the ties
    pub fn join_spacing_ms(mut self, spacing: u64) -> Self {
        self.join_spacing_ms = spacing;
        self
    }

    pub fn config(mut self, config: BatonConfig) -> Self {
        self.config = config;
        self
    }

    /// Create the session; `participant(1)` is privileged
    pub async fn build(self) -> SessionFixture {
        let effects = Arc::new(BatonEffectSystem::simulated(self.start_ms));
        let handler = TurnHandler::new(&self.config);
        let privileged = participant(1);

        let session = handler
            .create_session(&*effects, privileged, &[])
            .await
            .expect("create session");
        handler
            .touch_presence(&*effects, &session.id, privileged)
            .await
            .expect("privileged presence");

        let mut standard = Vec::new();
        for n in 0..self.standard {
            effects.clock().advance_time(self.join_spacing_ms);
            let id = participant(n + 2);
            handler
                .join_session(&*effects, &session.id, id)
                .await
                .expect("join session");
            standard.push(id);
        }

        SessionFixture {
            effects,
            handler,
            config: self.config,
            session_id: session.id,
            privileged,
            standard,
        }
    }
}

/// One open session with a privileged participant and standard members
#[derive(Debug, Clone)]
pub struct SessionFixture {
    pub effects: Arc<TestEffects>,
    pub handler: TurnHandler,
    pub config: BatonConfig,
    pub session_id: SessionId,
    pub privileged: ParticipantId,
    pub standard: Vec<ParticipantId>,
}

impl SessionFixture {
    pub fn builder() -> SessionFixtureBuilder {
        SessionFixtureBuilder::default()
    }

    /// Advance the simulated clock
    pub fn advance(&self, ms: u64) {
        self.effects.clock().advance_time(ms);
    }

    /// Take an action as `actor`
    pub async fn act(&self, actor: ParticipantId, content: &str) -> Result<ActionAccepted> {
        self.handler
            .append_action(
                &*self.effects,
                &self.session_id,
                actor,
                EventKind::Action,
                content.to_string(),
            )
            .await
    }

    /// Current turn state
    pub async fn turn(&self) -> TurnState {
        self.effects
            .turn_state(&self.session_id)
            .await
            .expect("turn state")
            .expect("session exists")
    }

    /// Current membership row of `participant_id`
    pub async fn member(&self, participant_id: ParticipantId) -> Membership {
        self.effects
            .members(&self.session_id)
            .await
            .expect("members")
            .into_iter()
            .find(|m| m.participant_id == participant_id)
            .expect("member exists")
    }

    /// Authoritative read as the privileged participant
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.handler
            .session_snapshot(&*self.effects, &self.session_id, self.privileged)
            .await
            .expect("snapshot")
    }
}
