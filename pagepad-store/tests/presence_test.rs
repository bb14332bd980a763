use chrono::Duration;
use pagepad_entity::ManualClock;
use pagepad_store::PresenceRegistry;
use std::sync::Arc;

fn registry() -> (ManualClock, PresenceRegistry) {
  let clock = ManualClock::starting_now();
  let registry = PresenceRegistry::new(Arc::new(clock.clone()));
  (clock, registry)
}

#[test]
fn heartbeat_marks_session_online() {
  let (_clock, registry) = registry();
  registry.heartbeat("p1", "s1", "ada");
  assert!(registry.is_online("p1", "s1"));

  let online = registry.online("p1");
  assert_eq!(online.len(), 1);
  assert_eq!(online[0].user_name, "ada");
}

#[test]
fn stale_entry_decays_without_explicit_leave() {
  let (clock, registry) = registry();
  registry.heartbeat("p1", "s1", "ada");

  clock.advance(Duration::seconds(14));
  assert!(registry.is_online("p1", "s1"));

  clock.advance(Duration::seconds(2));
  assert!(!registry.is_online("p1", "s1"));
  assert!(registry.online("p1").is_empty());
}

#[test]
fn heartbeat_refreshes_the_ttl() {
  let (clock, registry) = registry();
  registry.heartbeat("p1", "s1", "ada");

  clock.advance(Duration::seconds(10));
  registry.heartbeat("p1", "s1", "ada");

  clock.advance(Duration::seconds(10));
  assert!(registry.is_online("p1", "s1"));
}

#[test]
fn leave_removes_immediately() {
  let (_clock, registry) = registry();
  registry.heartbeat("p1", "s1", "ada");
  registry.heartbeat("p1", "s2", "brian");

  let removed = registry.leave("p1", "s1").expect("entry existed");
  assert_eq!(removed.user_name, "ada");
  assert!(!registry.is_online("p1", "s1"));
  assert!(registry.is_online("p1", "s2"));
}

#[test]
fn leave_of_unknown_session_is_a_no_op() {
  let (_clock, registry) = registry();
  assert!(registry.leave("p1", "ghost").is_none());
}

#[test]
fn prune_drops_only_expired_entries() {
  let (clock, registry) = registry();
  registry.heartbeat("p1", "old", "ada");
  clock.advance(Duration::seconds(20));
  registry.heartbeat("p1", "new", "brian");

  registry.prune();
  assert!(!registry.is_online("p1", "old"));
  assert!(registry.is_online("p1", "new"));
  assert_eq!(registry.online("p1").len(), 1);
}

#[test]
fn pages_are_isolated() {
  let (_clock, registry) = registry();
  registry.heartbeat("p1", "s1", "ada");
  registry.heartbeat("p2", "s1", "ada");

  assert_eq!(registry.online("p1").len(), 1);
  registry.leave("p1", "s1");
  assert!(registry.online("p1").is_empty());
  assert_eq!(registry.online("p2").len(), 1);
}
