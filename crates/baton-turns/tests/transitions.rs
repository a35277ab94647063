//! Transition protocol scenarios across the store, handler and limiter

#![allow(clippy::unwrap_used)]

use assert_matches::assert_matches;
use baton_core::effects::EventLogEffects;
use baton_core::{BatonConfig, BatonError, RateLimitConfig, WindowConfig};
use baton_testkit::{participant, SessionFixture};
use std::sync::Arc;

fn unlimited() -> BatonConfig {
    let wide = WindowConfig::new(100_000, 1_000);
    BatonConfig {
        rate_limits: RateLimitConfig {
            participant_burst: wide,
            participant_sustained: wide,
            participant_global: wide,
            session_burst: wide,
        },
        ..BatonConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_actors_never_share_a_turn() {
    let fixture = Arc::new(
        SessionFixture::builder()
            .standard(4)
            .config(unlimited())
            .build()
            .await,
    );
    let everyone: Vec<_> = std::iter::once(fixture.privileged)
        .chain(fixture.standard.iter().copied())
        .collect();

    let mut accepted_indexes = Vec::new();
    for _ in 0..15 {
        let attempts = everyone.iter().map(|actor| {
            let fixture = Arc::clone(&fixture);
            let actor = *actor;
            tokio::spawn(async move { fixture.act(actor, "move").await })
        });
        for joined in futures::future::join_all(attempts).await {
            match joined.unwrap() {
                Ok(accepted) => accepted_indexes.push(accepted.turn.turn_index),
                Err(err) => assert_matches!(err, BatonError::Conflict { .. }),
            }
        }
        fixture.advance(1);
    }

    // Every accepted call owns a distinct index and the indexes have no gaps.
    let final_index = fixture.turn().await.turn_index;
    accepted_indexes.sort_unstable();
    assert_eq!(accepted_indexes, (1..=final_index).collect::<Vec<_>>());
    assert!(final_index >= 15);

    let authored = fixture
        .effects
        .events_after(&fixture.session_id, None, 10_000)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.author.is_some())
        .count();
    assert_eq!(authored as u64, final_index);
}

#[tokio::test]
async fn two_participants_alternate_and_reject_double_moves() {
    let fixture = SessionFixture::builder().standard(1).build().await;
    let p = fixture.privileged;
    let s = participant(2);

    fixture.act(p, "you enter a cave").await.unwrap();
    let before = fixture.turn().await;
    assert_eq!(before.holder, Some(s));

    let accepted = fixture.act(s, "look around").await.unwrap();
    assert_eq!(accepted.turn.holder, None);
    assert_eq!(accepted.next_holder, p);
    assert_eq!(accepted.turn.turn_index, before.turn_index + 1);

    let err = fixture.act(s, "look again").await.unwrap_err();
    assert_eq!(err.code(), "conflict");
    assert!(err.requires_resync());
    assert_eq!(fixture.turn().await.turn_index, before.turn_index + 1);
}

#[tokio::test]
async fn colliding_join_times_fall_back_to_id_order() {
    let fixture = SessionFixture::builder()
        .standard(3)
        .join_spacing_ms(0)
        .build()
        .await;
    let snapshot = fixture.snapshot().await;
    assert_eq!(
        snapshot.order,
        vec![participant(1), participant(2), participant(3), participant(4)]
    );
}

#[tokio::test]
async fn next_holder_reflects_membership_at_commit_time() {
    let fixture = SessionFixture::builder().standard(2).build().await;
    let handler = &fixture.handler;
    let effects = &*fixture.effects;

    // participant(2) leaves before the privileged participant acts.
    handler
        .leave_session(effects, &fixture.session_id, participant(2))
        .await
        .unwrap();
    let accepted = fixture.act(fixture.privileged, "onward").await.unwrap();
    assert_eq!(accepted.next_holder, participant(3));

    // A latecomer is seated after everyone already present.
    fixture.advance(10);
    handler
        .join_session(effects, &fixture.session_id, participant(9))
        .await
        .unwrap();
    let accepted = fixture.act(participant(3), "wave").await.unwrap();
    assert_eq!(accepted.next_holder, participant(9));
}

#[tokio::test]
async fn departing_holder_hands_the_turn_on() {
    let fixture = SessionFixture::builder().standard(2).build().await;
    fixture.act(fixture.privileged, "begin").await.unwrap();

    let advanced = fixture
        .handler
        .leave_session(&*fixture.effects, &fixture.session_id, participant(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(advanced.holder, Some(participant(3)));
    assert_eq!(advanced.turn_index, 2);
}

#[tokio::test]
async fn burst_limit_rejects_with_retry_hint() {
    let mut config = unlimited();
    config.rate_limits.participant_burst = WindowConfig::new(1, 30_000);
    let fixture = SessionFixture::builder()
        .standard(0)
        .config(config)
        .build()
        .await;

    fixture.act(fixture.privileged, "one").await.unwrap();
    fixture.advance(12_500);
    let err = fixture.act(fixture.privileged, "two").await.unwrap_err();
    assert_eq!(err.code(), "rate_limited");
    assert_eq!(err.retry_after_secs(), Some(18));

    fixture.advance(17_500);
    fixture.act(fixture.privileged, "three").await.unwrap();
    assert_eq!(fixture.turn().await.turn_index, 2);
}
