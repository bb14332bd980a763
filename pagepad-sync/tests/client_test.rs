use crate::util::{text_block, wait_until, FlakyTransport, MuteTransport, TestBed};
use pagepad_entity::{PageDraft, PageEvent, PageMeta, SystemClock};
use pagepad_sync::client::state::SyncState;
use pagepad_sync::{AgentSeed, SyncAgent, SyncOptions};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn agent_on(
  transport: Arc<dyn pagepad_sync::SyncTransport>,
  seed: AgentSeed,
  name: &str,
) -> SyncAgent {
  SyncAgent::spawn(
    transport,
    seed,
    name,
    SyncOptions::fast(),
    Arc::new(SystemClock),
  )
}

#[tokio::test]
async fn agent_bootstraps_from_canonical_state() {
  let bed = TestBed::new();
  let page = bed.seeded_page("boot").await;

  let agent = agent_on(
    bed.transport.clone(),
    AgentSeed::Existing {
      page_id: page.id.clone(),
    },
    "ada",
  );
  wait_until("canonical bootstrap", || {
    agent.page().map(|p| p.revision == page.revision).unwrap_or(false)
  })
  .await;
  assert_eq!(agent.state(), SyncState::Idle);
  agent.close().await;
}

#[tokio::test]
async fn edits_within_the_debounce_window_coalesce_into_one_write() {
  let bed = TestBed::new();
  let page = bed.seeded_page("debounce").await;
  let transport = Arc::new(FlakyTransport::new(bed.transport.clone()));

  let agent = agent_on(
    transport.clone(),
    AgentSeed::Existing {
      page_id: page.id.clone(),
    },
    "ada",
  );
  wait_until("bootstrap", || agent.page().is_some()).await;

  agent.edit_blocks(vec![text_block("one")]);
  agent.edit_blocks(vec![text_block("one"), text_block("two")]);

  wait_until("coalesced write to land", || {
    agent.page().map(|p| p.blocks.len() == 2).unwrap_or(false)
  })
  .await;
  assert_eq!(transport.block_writes.load(Ordering::SeqCst), 1);
  assert_eq!(agent.state(), SyncState::Idle);
  agent.close().await;
}

#[tokio::test]
async fn draft_agent_creates_page_then_writes_against_it() {
  let bed = TestBed::new();
  let agent = agent_on(
    bed.transport.clone(),
    AgentSeed::Draft(PageDraft::new("fresh draft")),
    "ada",
  );

  agent.edit_blocks(vec![text_block("first words")]);
  wait_until("create + first write", || {
    agent
      .page()
      .map(|p| !p.id.is_empty() && p.blocks.len() == 1)
      .unwrap_or(false)
  })
  .await;

  let page = agent.page().unwrap();
  let stored = bed.coordinator.get_page(&page.id).await.unwrap();
  assert_eq!(stored.title, "fresh draft");
  assert_eq!(stored.blocks[0].data["text"], "first words");
  agent.close().await;
}

#[tokio::test]
async fn conflicted_agent_adopts_canonical_and_reissues_cleanly() {
  let bed = TestBed::new();
  let page = bed.seeded_page("contended").await;

  // This agent never hears about remote commits, so its base goes stale.
  let transport = Arc::new(MuteTransport::new(bed.transport.clone()));
  let agent = agent_on(
    transport,
    AgentSeed::Existing {
      page_id: page.id.clone(),
    },
    "bee",
  );
  wait_until("bootstrap at r0", || agent.page().is_some()).await;

  // Another writer commits r1 behind the agent's back.
  let winner = bed
    .coordinator
    .update_blocks(&page.id, vec![text_block("winner")], &page.revision)
    .await
    .unwrap();
  let r1 = winner.page().revision.clone();

  // The agent's write races against r0 and must lose.
  agent.edit_blocks(vec![text_block("loser")]);
  wait_until("conflict adoption", || {
    agent.page().map(|p| p.revision == r1).unwrap_or(false)
  })
  .await;

  // Canonical content was adopted wholesale and the superseded edit dropped.
  let adopted = agent.page().unwrap();
  assert_eq!(adopted.blocks[0].data["text"], "winner");
  wait_until("idle after adoption", || agent.state() == SyncState::Idle).await;

  // A re-issued edit now carries base r1 and commits at r2.
  agent.edit_blocks(vec![text_block("winner"), text_block("retried")]);
  wait_until("reissue lands", || {
    agent
      .page()
      .map(|p| p.revision > r1 && p.blocks.len() == 2)
      .unwrap_or(false)
  })
  .await;
  let stored = bed.coordinator.get_page(&page.id).await.unwrap();
  assert_eq!(stored.blocks[1].data["text"], "retried");
  agent.close().await;
}

#[tokio::test]
async fn remote_snapshot_is_gated_while_dirty() {
  let bed = TestBed::new();
  let page = bed.seeded_page("gated").await;

  // Long debounce keeps the agent Dirty for the whole test.
  let mut options = SyncOptions::fast();
  options.debounce = Duration::from_secs(30);
  let agent = SyncAgent::spawn(
    bed.transport.clone(),
    AgentSeed::Existing {
      page_id: page.id.clone(),
    },
    "ada",
    options,
    Arc::new(SystemClock),
  );
  wait_until("bootstrap", || agent.page().is_some()).await;

  agent.edit_blocks(vec![text_block("local, unsent")]);
  wait_until("dirty", || agent.state() == SyncState::Dirty).await;

  // A remote commit lands while the agent holds unsent local edits.
  bed
    .coordinator
    .update_blocks(&page.id, vec![text_block("remote")], &page.revision)
    .await
    .unwrap();

  // The stale-looking snapshot must not clobber local state.
  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(agent.page().unwrap().revision, page.revision);
  assert_eq!(agent.state(), SyncState::Dirty);
  agent.close().await;
}

#[tokio::test]
async fn duplicate_page_events_apply_idempotently() {
  let bed = TestBed::new();
  let page = bed.seeded_page("dupes").await;

  let agent = agent_on(
    bed.transport.clone(),
    AgentSeed::Existing {
      page_id: page.id.clone(),
    },
    "ada",
  );
  wait_until("bootstrap", || agent.page().is_some()).await;

  let updated = bed
    .coordinator
    .update_blocks(&page.id, vec![text_block("once")], &page.revision)
    .await
    .unwrap()
    .into_page();
  wait_until("first delivery", || {
    agent.page().map(|p| p.revision == updated.revision).unwrap_or(false)
  })
  .await;
  let adopted_once = agent.page().unwrap();

  // At-least-once delivery: the same snapshot shows up again.
  bed
    .coordinator
    .broadcast()
    .publish(PageEvent::snapshot(updated.clone()));
  tokio::time::sleep(Duration::from_millis(100)).await;

  let adopted_twice = agent.page().unwrap();
  assert_eq!(adopted_twice.revision, updated.revision);
  // Same revision means the duplicate was a no-op, not a re-application.
  assert!(Arc::ptr_eq(&adopted_once, &adopted_twice));
  agent.close().await;
}

#[tokio::test]
async fn transient_write_failures_retry_until_success() {
  let bed = TestBed::new();
  let page = bed.seeded_page("flaky").await;
  let transport = Arc::new(FlakyTransport::new(bed.transport.clone()));
  transport.fail_next_block_writes(2);

  let agent = agent_on(
    transport.clone(),
    AgentSeed::Existing {
      page_id: page.id.clone(),
    },
    "ada",
  );
  wait_until("bootstrap", || agent.page().is_some()).await;

  agent.edit_blocks(vec![text_block("persistent")]);
  wait_until("write eventually lands", || {
    agent.page().map(|p| p.blocks.len() == 1).unwrap_or(false)
  })
  .await;

  // Two injected failures plus the success.
  assert_eq!(transport.block_writes.load(Ordering::SeqCst), 3);
  assert_eq!(agent.state(), SyncState::Idle);
  assert!(agent.last_error().is_none());
  agent.close().await;
}

#[tokio::test]
async fn dropped_stream_reconnects_and_refetches_canonical_state() {
  let bed = TestBed::new();
  let page = bed.seeded_page("reconnect").await;
  let transport = Arc::new(FlakyTransport::new(bed.transport.clone()));
  transport.drop_next_streams(1);

  let agent = agent_on(
    transport.clone(),
    AgentSeed::Existing {
      page_id: page.id.clone(),
    },
    "ada",
  );

  // A commit lands while the first (dead) stream is nominally attached.
  let updated = bed
    .coordinator
    .update_blocks(&page.id, vec![text_block("while away")], &page.revision)
    .await
    .unwrap()
    .into_page();

  // The reconnect must re-fetch canonical state rather than assume nothing
  // happened while the stream was down.
  wait_until("canonical state after reconnect", || {
    agent.page().map(|p| p.revision == updated.revision).unwrap_or(false)
  })
  .await;
  assert!(transport.subscribes.load(Ordering::SeqCst) >= 2);
  assert!(transport.fetches.load(Ordering::SeqCst) >= 2);
  agent.close().await;
}

#[tokio::test]
async fn meta_edits_flow_through_the_same_cas_path() {
  let bed = TestBed::new();
  let page = bed.seeded_page("meta path").await;
  let agent = agent_on(
    bed.transport.clone(),
    AgentSeed::Existing {
      page_id: page.id.clone(),
    },
    "ada",
  );
  wait_until("bootstrap", || agent.page().is_some()).await;

  agent.edit_meta(PageMeta {
    title: Some("settled".to_string()),
    ..Default::default()
  });
  agent.edit_meta(PageMeta {
    dark_mode: Some(true),
    ..Default::default()
  });

  wait_until("coalesced meta write", || {
    agent
      .page()
      .map(|p| p.title == "settled" && p.dark_mode)
      .unwrap_or(false)
  })
  .await;
  agent.close().await;
}

#[tokio::test]
async fn typing_indicators_fan_out_and_decay() {
  let bed = TestBed::new();
  let page = bed.seeded_page("typing").await;
  let seed = AgentSeed::Existing {
    page_id: page.id.clone(),
  };

  let typist = agent_on(bed.transport.clone(), seed.clone(), "ada");
  let viewer = agent_on(bed.transport.clone(), seed, "brian");
  wait_until("both bootstrapped", || {
    typist.page().is_some() && viewer.page().is_some()
  })
  .await;

  typist.set_typing("b1", true);
  wait_until("indicator visible", || viewer.typing_on("b1").is_some()).await;
  assert_eq!(
    viewer.typing_on("b1").unwrap().session_id,
    typist.session_id()
  );

  // The typist never sees its own echo.
  assert!(typist.typing_on("b1").is_none());

  // No refresh: the local decay clears the indicator on its own.
  wait_until("indicator decays", || viewer.typing_on("b1").is_none()).await;

  typist.close().await;
  viewer.close().await;
}

#[tokio::test]
async fn presence_appears_on_heartbeat_and_clears_on_close() {
  let bed = TestBed::new();
  let page = bed.seeded_page("presence").await;
  let seed = AgentSeed::Existing {
    page_id: page.id.clone(),
  };

  let visitor = agent_on(bed.transport.clone(), seed.clone(), "ada");
  let viewer = agent_on(bed.transport.clone(), seed, "brian");
  wait_until("visitor visible to viewer", || {
    viewer
      .online_peers()
      .iter()
      .any(|p| p.session_id == visitor.session_id())
  })
  .await;

  let visitor_session = visitor.session_id().to_string();
  visitor.close().await;

  // Teardown sent an explicit offline; the viewer drops the peer at once.
  wait_until("visitor gone after close", || {
    !viewer
      .online_peers()
      .iter()
      .any(|p| p.session_id == visitor_session)
  })
  .await;
  viewer.close().await;
}
