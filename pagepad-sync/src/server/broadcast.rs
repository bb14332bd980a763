use dashmap::DashMap;
use pagepad_entity::PageEvent;
use tokio::sync::broadcast::{channel, Receiver, Sender};

const DEFAULT_CAPACITY: usize = 64;

/// Topic-keyed fanout, topic = page id. Publishing never blocks the writer
/// path: events land in the per-topic broadcast buffer and subscribers drain
/// it at their own pace. Events for one page keep the order they were
/// published in; a subscriber that falls behind sees `Lagged` and must
/// re-fetch canonical state.
pub struct PageBroadcast {
  topics: DashMap<String, Sender<PageEvent>>,
  capacity: usize,
}

impl Default for PageBroadcast {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

impl PageBroadcast {
  pub fn new(capacity: usize) -> Self {
    Self {
      topics: DashMap::new(),
      capacity,
    }
  }

  /// Fire-and-forget. An event for a page nobody watches is dropped and its
  /// topic garbage-collected; a receiver created during the gc window
  /// observes `Closed` and heals by resubscribing.
  pub fn publish(&self, event: PageEvent) {
    let page_id = event.page_id().to_string();
    let delivered = match self.topics.get(&page_id) {
      Some(topic) => topic.send(event).is_ok(),
      None => false,
    };
    if !delivered {
      tracing::trace!(%page_id, "no subscribers, dropping topic");
      self
        .topics
        .remove_if(&page_id, |_, topic| topic.receiver_count() == 0);
    }
  }

  /// Join the topic. New subscribers receive no history: fetch canonical
  /// state once, then consume events forward.
  pub fn subscribe(&self, page_id: &str) -> Receiver<PageEvent> {
    self
      .topics
      .entry(page_id.to_string())
      .or_insert_with(|| channel(self.capacity).0)
      .subscribe()
  }

  pub fn subscriber_count(&self, page_id: &str) -> usize {
    self
      .topics
      .get(page_id)
      .map(|topic| topic.receiver_count())
      .unwrap_or(0)
  }
}
