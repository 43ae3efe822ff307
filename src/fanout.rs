//! Per-subscriber delivery policy.
//!
//! Sample streams hand every passing event to every subscriber; filter
//! streams re-match each event against each subscriber's own keywords, since
//! the upstream connection carries the union of everyone's keywords.
//!
//! Delivery never waits: a full queue drops the event for that subscriber
//! only, so one stalled consumer cannot hold up the read loop or anyone else.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::controller::StreamKind;
use crate::event::StreamEvent;
use crate::registry::SubscriberEntry;

/// Offer `event` to every matching subscriber in `subscribers`.
pub(crate) fn dispatch(kind: StreamKind, subscribers: &[SubscriberEntry], event: &Arc<StreamEvent>) {
    for entry in subscribers {
        let wanted = match kind {
            StreamKind::Sample => true,
            StreamKind::Filter => event
                .text()
                .is_some_and(|text| keyword_match(&entry.keywords, text)),
        };
        if wanted {
            offer(entry, event);
        }
    }
}

/// Case-insensitive substring match of any keyword against the event text.
pub(crate) fn keyword_match(keywords: &[String], text: &str) -> bool {
    let text = text.to_lowercase();
    keywords
        .iter()
        .any(|keyword| text.contains(&keyword.to_lowercase()))
}

fn offer(entry: &SubscriberEntry, event: &Arc<StreamEvent>) {
    match entry.tx.try_send(Arc::clone(event)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            let dropped = entry.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(subscriber = %entry.id, dropped, "subscriber queue full, dropping event");
        }
        // Receiver already gone; the owning layer is about to unsubscribe.
        Err(TrySendError::Closed(_)) => {}
    }
}
