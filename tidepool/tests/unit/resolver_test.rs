use tidepool::client::{parse_target, target_for, PartitionResolver};
use tidepool::{PartitionConfig, PartitionId, RsmError};

fn membership(leader: &str, members: &[&str]) -> PartitionConfig {
    PartitionConfig::new(
        PartitionId(4),
        members.iter().map(|m| m.to_string()).collect(),
    )
    .with_leader(leader)
}

#[test]
fn test_target_round_trip() {
    let target = target_for(PartitionId(4));
    assert_eq!(target, "rsm:///4");
    assert_eq!(parse_target(&target).expect("parse"), PartitionId(4));
    assert!(matches!(
        parse_target("dns:///4"),
        Err(RsmError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_update_leaves_held_snapshots_alone() {
    let resolver = PartitionResolver::new(&membership("a", &["a", "b"]));
    let mut updates = resolver.subscribe();
    let in_flight = resolver.state();

    resolver
        .update(&membership("c", &["b", "c"]))
        .expect("same partition");
    updates.changed().await.expect("update published");

    assert_eq!(in_flight.addresses, vec!["a", "b"]);
    assert_eq!(resolver.state().addresses, vec!["c", "b"]);
    assert!(resolver.state().version > in_flight.version);
    assert_eq!(resolver.pick(&resolver.state()).as_deref(), Some("c"));
}

#[test]
fn test_unavailable_leader_rotates_pick() {
    let resolver = PartitionResolver::new(&membership("a", &["a", "b", "c"]));
    let state = resolver.state();
    assert_eq!(resolver.pick(&state).as_deref(), Some("a"));

    resolver.report_unavailable("a");
    assert_eq!(resolver.pick(&state).as_deref(), Some("b"));

    // A stale report for an address no longer picked is ignored.
    resolver.report_unavailable("a");
    assert_eq!(resolver.pick(&state).as_deref(), Some("b"));
}

#[test]
fn test_update_for_other_partition_is_rejected() {
    let resolver = PartitionResolver::new(&membership("a", &["a"]));
    let other = PartitionConfig::new(PartitionId(5), vec!["x".to_string()]);
    assert!(matches!(resolver.update(&other), Err(RsmError::Invalid(_))));
    assert_eq!(resolver.state().addresses, vec!["a"]);
}
