//! Feed assertions

use baton_turns::{FeedFrame, FeedMessage, FeedSubscription};
use std::time::Duration;

/// Default wait for a feed frame
pub const FEED_WAIT: Duration = Duration::from_secs(2);

/// Next non-heartbeat message, panicking after `within`
pub async fn next_message(subscription: &mut FeedSubscription, within: Duration) -> FeedMessage {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let frame = tokio::time::timeout_at(deadline, subscription.recv())
            .await
            .expect("no feed message before the deadline")
            .expect("feed closed");
        if let FeedFrame::Message(message) = frame {
            return message;
        }
    }
}

/// Messages up to and including the next `Refresh`
pub async fn messages_until_refresh(
    subscription: &mut FeedSubscription,
    within: Duration,
) -> Vec<FeedMessage> {
    let mut messages = Vec::new();
    loop {
        let message = next_message(subscription, within).await;
        let done = message == FeedMessage::Refresh;
        messages.push(message);
        if done {
            return messages;
        }
    }
}

/// Wait for the feed to end, panicking after `within`
pub async fn expect_closed(subscription: &mut FeedSubscription, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::timeout_at(deadline, subscription.recv())
        .await
        .expect("feed still open at the deadline")
        .is_some()
    {}
}
