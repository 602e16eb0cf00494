//! LISTEN/NOTIFY support.
//!
//! Each channel keeps a set of subscribers and a one-shot "subscribed"
//! latch resolved after the `LISTEN` round-trip. Notifications observed
//! before the latch resolves belong to an earlier subscription generation
//! and are discarded — `LISTEN` is not synchronous against the `NOTIFY`
//! stream, so gaps are possible and tolerated.
use std::{
    pin::Pin,
    sync::{Arc, Weak, atomic::Ordering},
    task::{Context, Poll},
};

use tokio::sync::mpsc;

use crate::{Error, Result, postgres::backend::NotificationResponse, sync::Latch};

use super::{Connection, Shared};

/// Subscriber channel depth; the dispatcher awaits delivery, so a slow
/// consumer pushes back on the whole connection once this fills.
const SUBSCRIBER_BUFFER: usize = 8;

/// An asynchronous notification.
#[derive(Clone, Debug)]
pub struct Notification {
    process_id: i32,
    channel: String,
    payload: String,
}

impl Notification {
    /// The process ID of the notifying backend process.
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// The name of the channel that the notify has been raised on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The "payload" string passed from the notifying process.
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

pub(crate) struct Channel {
    subscribers: Vec<Subscriber>,
    /// Resolved `true` once `LISTEN` round-tripped; `false` when it failed
    /// and the registration was rolled back.
    subscribed: Latch<bool>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Notification>,
}

/// Route one `NotificationResponse`, awaiting every subscriber.
pub(super) async fn dispatch(shared: &Shared, n: NotificationResponse) {
    let targets: Vec<mpsc::Sender<Notification>> = {
        let channels = shared.channels.lock();
        match channels.get(n.channel.as_str()) {
            // unsubscribed, or subscription not yet confirmed: a stray
            // notification from a previous generation, dropped by design
            Some(channel) if channel.subscribed.get() == Some(true) => {
                channel.subscribers.iter().map(|s| s.tx.clone()).collect()
            }
            _ => return,
        }
    };

    let notification = Notification {
        process_id: n.process_id,
        channel: n.channel.to_string(),
        payload: n.payload.to_string(),
    };

    for tx in targets {
        // a dropped receiver is unregistered lazily; ignore it here
        let _ = tx.send(notification.clone()).await;
    }
}

pub(super) async fn listen(
    conn: &Connection,
    shared: &Arc<Shared>,
    channel: &str,
) -> Result<Listener> {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let id = shared.subscriber_ids.fetch_add(1, Ordering::Relaxed);

    let existing = {
        let mut channels = shared.channels.lock();
        match channels.get_mut(channel) {
            Some(entry) => {
                entry.subscribers.push(Subscriber { id, tx });
                Some(entry.subscribed.clone())
            }
            None => {
                let entry = Channel {
                    subscribers: vec![Subscriber { id, tx }],
                    subscribed: Latch::new(),
                };
                channels.insert(channel.to_string(), entry);
                None
            }
        }
    };

    match existing {
        // an earlier listener owns the LISTEN round-trip; wait it out
        Some(latch) => {
            if !latch.wait().await {
                return Err(Error::closed());
            }
        }
        None => {
            let subscribe = conn.query(&format!("LISTEN \"{channel}\""), &[]).await;
            let mut channels = shared.channels.lock();
            match subscribe {
                Ok(_) => {
                    if let Some(entry) = channels.get(channel) {
                        entry.subscribed.set(true);
                    }
                }
                Err(err) => {
                    if let Some(entry) = channels.remove(channel) {
                        entry.subscribed.set(false);
                    }
                    return Err(err);
                }
            }
        }
    }

    Ok(Listener {
        channel: channel.to_string(),
        id,
        rx,
        shared: Arc::downgrade(shared),
        detached: false,
    })
}

/// Remove a subscriber; returns `true` when it was the channel's last one
/// and the registration entry was dropped.
///
/// The entry is dropped *before* the `UNLISTEN` round-trip so no further
/// notification routes to any listener from the moment of unsubscription.
fn remove_subscriber(shared: &Shared, channel: &str, id: u64) -> bool {
    let mut channels = shared.channels.lock();
    let Some(entry) = channels.get_mut(channel) else {
        return false;
    };
    entry.subscribers.retain(|s| s.id != id);
    match entry.subscribers.is_empty() {
        true => {
            channels.remove(channel);
            true
        }
        false => false,
    }
}

async fn unlisten(shared: &Arc<Shared>, channel: &str) -> Result<()> {
    let permit = shared.acquire().await?;
    let sql = format!("UNLISTEN \"{channel}\"");
    crate::query::execute_simple(shared, permit, &sql).await
}

/// A subscription to one notification channel.
///
/// Yields notifications as a stream. Dropping the listener unsubscribes;
/// [`unlisten`][Listener::unlisten] does the same but awaits the
/// `UNLISTEN` round-trip when this was the channel's last subscription.
pub struct Listener {
    channel: String,
    id: u64,
    rx: mpsc::Receiver<Notification>,
    shared: Weak<Shared>,
    detached: bool,
}

impl Listener {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next notification; `None` once the connection terminated.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Unsubscribe, waiting for the server round-trip.
    pub async fn unlisten(mut self) -> Result<()> {
        self.detached = true;
        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };
        if remove_subscriber(&shared, &self.channel, self.id) {
            unlisten(&shared, &self.channel).await?;
        }
        Ok(())
    }
}

impl futures_core::Stream for Listener {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if !remove_subscriber(&shared, &self.channel, self.id) {
            return;
        }
        // last subscriber gone: the registration is already removed, the
        // server-side UNLISTEN is best effort
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let channel = std::mem::take(&mut self.channel);
            handle.spawn(async move {
                let _ = unlisten(&shared, &channel).await;
            });
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").field("channel", &self.channel).finish_non_exhaustive()
    }
}
