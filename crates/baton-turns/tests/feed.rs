//! Change feed behaviour against a live polling task

#![allow(clippy::unwrap_used)]

use baton_core::effects::DerivedStateEffects;
use baton_core::{BatonConfig, DerivedKind, FeedConfig};
use baton_testkit::{
    expect_closed, messages_until_refresh, next_message, participant, session, SessionFixture,
    TestEffects, FEED_WAIT,
};
use baton_turns::{FeedFrame, FeedMessage, FeedSubscription, SessionFeedHub};
use std::sync::Arc;
use std::time::Duration;

fn fast_feed() -> BatonConfig {
    BatonConfig {
        feed: FeedConfig {
            tick_ms: 10,
            keepalive_ms: 60,
            ..FeedConfig::default()
        },
        ..BatonConfig::default()
    }
}

async fn fixture_with_hub(standard: u128) -> (SessionFixture, SessionFeedHub<TestEffects>) {
    let fixture = SessionFixture::builder()
        .standard(standard)
        .config(fast_feed())
        .build()
        .await;
    let hub = SessionFeedHub::new(Arc::clone(&fixture.effects), &fixture.config);
    (fixture, hub)
}

/// Read refresh batches until one contains a message matching `wanted`,
/// returning every message read on the way
async fn wait_for<F>(subscription: &mut FeedSubscription, wanted: F) -> Vec<FeedMessage>
where
    F: Fn(&FeedMessage) -> bool,
{
    let mut seen = Vec::new();
    for _ in 0..10 {
        let batch = messages_until_refresh(subscription, FEED_WAIT).await;
        let found = batch.iter().any(&wanted);
        seen.extend(batch);
        if found {
            return seen;
        }
    }
    panic!("expected message never arrived");
}

async fn wait_for_gauge(hub: &SessionFeedHub<TestEffects>, expected: usize) {
    tokio::time::timeout(FEED_WAIT, async {
        while hub.open_connections() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn ping_comes_first() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let mut feed = hub
        .subscribe(fixture.session_id, fixture.privileged)
        .await
        .unwrap();
    assert_eq!(
        next_message(&mut feed, FEED_WAIT).await,
        FeedMessage::Ping {
            session_id: fixture.session_id,
            turn_index: 0
        }
    );
    assert_eq!(hub.open_connections(), 1);
}

#[tokio::test]
async fn action_produces_typed_messages_then_one_refresh() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let mut feed = hub
        .subscribe(fixture.session_id, participant(2))
        .await
        .unwrap();
    next_message(&mut feed, FEED_WAIT).await;

    fixture.act(fixture.privileged, "a door creaks").await.unwrap();
    let batch = wait_for(&mut feed, |m| matches!(m, FeedMessage::TurnAssigned { .. })).await;

    let posted = batch
        .iter()
        .find_map(|m| match m {
            FeedMessage::EventPosted { events } => Some(events.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].content, "a door creaks");
    assert_eq!(posted[0].author, Some(fixture.privileged));

    let FeedMessage::TurnAssigned { turn, holder } = batch
        .iter()
        .find(|m| matches!(m, FeedMessage::TurnAssigned { .. }))
        .unwrap()
    else {
        unreachable!()
    };
    assert_eq!(*holder, participant(2));
    assert_eq!(turn.turn_index, 1);

    // Refresh closes every batch and is never sent for an empty one.
    assert_eq!(batch.last(), Some(&FeedMessage::Refresh));
    assert_ne!(batch.first(), Some(&FeedMessage::Refresh));
    assert!(!batch
        .windows(2)
        .any(|pair| pair[0] == FeedMessage::Refresh && pair[1] == FeedMessage::Refresh));
}

#[tokio::test]
async fn joins_and_derived_views_are_announced() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let mut feed = hub
        .subscribe(fixture.session_id, fixture.privileged)
        .await
        .unwrap();
    next_message(&mut feed, FEED_WAIT).await;

    fixture.advance(50);
    fixture
        .handler
        .join_session(&*fixture.effects, &fixture.session_id, participant(7))
        .await
        .unwrap();
    let batch = wait_for(&mut feed, |m| matches!(m, FeedMessage::MemberJoined { .. })).await;
    let joined = batch
        .iter()
        .find_map(|m| match m {
            FeedMessage::MemberJoined { members } => Some(members.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].participant_id, participant(7));

    fixture.advance(50);
    let now = fixture.effects.clock().now();
    fixture
        .effects
        .mark_derived_updated(&fixture.session_id, DerivedKind::Summary, now)
        .await
        .unwrap();
    let batch = wait_for(&mut feed, |m| matches!(m, FeedMessage::SummaryUpdated { .. })).await;
    assert!(batch.contains(&FeedMessage::SummaryUpdated { updated_at: now }));
    assert!(!batch
        .iter()
        .any(|m| matches!(m, FeedMessage::CharactersUpdated { .. })));
}

#[tokio::test]
async fn idle_feed_sends_heartbeats() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let mut feed = hub
        .subscribe(fixture.session_id, fixture.privileged)
        .await
        .unwrap();
    next_message(&mut feed, FEED_WAIT).await;

    let frame = tokio::time::timeout(FEED_WAIT, feed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, FeedFrame::Heartbeat);
}

#[tokio::test]
async fn closing_or_dropping_releases_the_connection() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let first = hub
        .subscribe(fixture.session_id, fixture.privileged)
        .await
        .unwrap();
    let second = hub
        .subscribe(fixture.session_id, participant(2))
        .await
        .unwrap();
    assert_eq!(hub.open_connections(), 2);

    first.close().await;
    assert_eq!(hub.open_connections(), 1);

    drop(second);
    wait_for_gauge(&hub, 0).await;
}

#[tokio::test]
async fn teardown_closes_every_feed_of_the_session() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let mut first = hub
        .subscribe(fixture.session_id, fixture.privileged)
        .await
        .unwrap();
    let mut second = hub
        .subscribe(fixture.session_id, participant(2))
        .await
        .unwrap();

    hub.teardown(&fixture.session_id);
    assert!(first.is_cancelled());
    assert!(second.is_cancelled());
    expect_closed(&mut first, FEED_WAIT).await;
    expect_closed(&mut second, FEED_WAIT).await;
    wait_for_gauge(&hub, 0).await;

    // A later subscription gets a fresh parent.
    let mut again = hub
        .subscribe(fixture.session_id, fixture.privileged)
        .await
        .unwrap();
    assert!(!again.is_cancelled());
    assert!(matches!(
        next_message(&mut again, FEED_WAIT).await,
        FeedMessage::Ping { .. }
    ));
}

#[tokio::test]
async fn ticks_drive_the_watchdog() {
    let (fixture, hub) = fixture_with_hub(2).await;
    fixture.act(fixture.privileged, "your move").await.unwrap();

    let mut feed = hub
        .subscribe(fixture.session_id, participant(3))
        .await
        .unwrap();
    next_message(&mut feed, FEED_WAIT).await;

    fixture.advance(fixture.config.watchdog.stale_after_ms + 1);
    let batch = wait_for(&mut feed, |m| {
        matches!(m, FeedMessage::TurnAssigned { holder, .. } if *holder == participant(3))
    })
    .await;
    assert!(batch.iter().any(|m| matches!(
        m,
        FeedMessage::EventPosted { events }
            if events.iter().any(|e| e.content.contains("skipped"))
    )));
    assert_eq!(fixture.member(participant(2)).await.timeout_streak, 1);
}

#[tokio::test]
async fn outsiders_cannot_subscribe() {
    let (fixture, hub) = fixture_with_hub(1).await;

    let err = hub
        .subscribe(fixture.session_id, participant(99))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");

    let err = hub
        .subscribe(session(99), fixture.privileged)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
    assert_eq!(hub.open_connections(), 0);
}

/// Skip messages until an in-band error arrives
async fn wait_for_error(subscription: &mut FeedSubscription) -> (String, String) {
    loop {
        if let FeedMessage::Error { code, message } = next_message(subscription, FEED_WAIT).await {
            return (code, message);
        }
    }
}

#[tokio::test]
async fn stream_errors_arrive_in_band_and_the_feed_survives() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let mut feed = hub
        .subscribe(fixture.session_id, participant(2))
        .await
        .unwrap();
    next_message(&mut feed, FEED_WAIT).await;

    fixture.effects.inject_fault("events_after");
    let (code, _) = wait_for_error(&mut feed).await;
    assert_eq!(code, "internal");
    assert!(!feed.is_cancelled());
    assert_eq!(hub.open_connections(), 1);

    fixture.effects.clear_faults();
    fixture.act(fixture.privileged, "still here").await.unwrap();
    let batch = wait_for(&mut feed, |m| {
        matches!(m, FeedMessage::EventPosted { events } if events.iter().any(|e| e.content == "still here"))
    })
    .await;
    assert_eq!(batch.last(), Some(&FeedMessage::Refresh));
}

#[tokio::test]
async fn failed_tick_is_replayed_in_full() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let mut feed = hub
        .subscribe(fixture.session_id, participant(2))
        .await
        .unwrap();
    next_message(&mut feed, FEED_WAIT).await;

    // Events are read before the turn state, so this tick fails half way.
    fixture.effects.inject_fault("turn_state");
    fixture.act(fixture.privileged, "a lost line").await.unwrap();
    wait_for_error(&mut feed).await;

    fixture.effects.clear_faults();
    let batch = wait_for(&mut feed, |m| matches!(m, FeedMessage::TurnAssigned { .. })).await;
    assert!(batch.iter().any(|m| matches!(
        m,
        FeedMessage::EventPosted { events } if events.iter().any(|e| e.content == "a lost line")
    )));
}

#[tokio::test]
async fn finished_feeds_release_their_session_entry() {
    let (fixture, hub) = fixture_with_hub(1).await;
    let first = hub
        .subscribe(fixture.session_id, fixture.privileged)
        .await
        .unwrap();
    let second = hub
        .subscribe(fixture.session_id, participant(2))
        .await
        .unwrap();
    assert_eq!(hub.tracked_sessions(), 1);

    first.close().await;
    assert_eq!(hub.tracked_sessions(), 1);

    drop(second);
    tokio::time::timeout(FEED_WAIT, async {
        while hub.tracked_sessions() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(format!("{hub:?}").contains("sessions: 0"));

    // Feeds ending after a teardown leave a newer entry alone.
    let old = hub
        .subscribe(fixture.session_id, fixture.privileged)
        .await
        .unwrap();
    hub.teardown(&fixture.session_id);
    let current = hub
        .subscribe(fixture.session_id, participant(2))
        .await
        .unwrap();
    old.close().await;
    assert_eq!(hub.tracked_sessions(), 1);
    current.close().await;
    assert_eq!(hub.tracked_sessions(), 0);
}
