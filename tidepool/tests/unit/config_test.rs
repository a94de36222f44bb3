use std::sync::Arc;
use std::time::Duration;

use tidepool::client::target_for;
use tidepool::{
    ClientConfig, LocalNetwork, MemberId, NodeConfig, PartitionId, ProtocolClient, ProtocolConfig,
    RsmError,
};

const MEMBERSHIP: &str = r#"{
    "partitions": [
        { "partition_id": 2, "members": ["node-a", "node-b"] },
        { "partition_id": 1, "leader": "node-b", "members": ["node-a", "node-b"] }
    ]
}"#;

#[test]
fn test_membership_from_json() {
    let config = ProtocolConfig::from_json(MEMBERSHIP).expect("valid membership");
    assert_eq!(config.partitions.len(), 2);
    assert_eq!(config.partitions[0].leader, None);
    assert_eq!(config.partitions[1].leader.as_deref(), Some("node-b"));
}

#[test]
fn test_missing_fields_take_defaults() {
    let node = NodeConfig::from_json(r#"{ "member_id": 3 }"#).expect("node config");
    assert_eq!(node.member_id, MemberId(3));
    assert_eq!(node.propose_timeout, NodeConfig::default().propose_timeout);

    let client = ClientConfig::from_json("{}").expect("client config");
    assert_eq!(client, ClientConfig::default());
    assert_eq!(client.keep_alive_interval(), client.session_timeout / 2);
}

#[test]
fn test_malformed_config_is_invalid() {
    assert!(matches!(
        ProtocolConfig::from_json(r#"{ "partitions": 7 }"#),
        Err(RsmError::Invalid(_))
    ));
    assert!(matches!(
        ClientConfig::from_json("not json"),
        Err(RsmError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_client_from_loaded_membership() {
    let config = ProtocolConfig::from_json(MEMBERSHIP).expect("valid membership");
    let client = ProtocolClient::new(
        Arc::new(LocalNetwork::new()),
        ClientConfig::default().with_session_timeout(Duration::from_secs(5)),
    );
    client.connect(&config).await.expect("connect");

    let partition = client.partition(PartitionId(1)).expect("partition 1");
    let resolver = partition.resolver().expect("connected");
    assert_eq!(resolver.target(), target_for(PartitionId(1)));
    assert_eq!(resolver.state().addresses, vec!["node-b", "node-a"]);

    // Nothing is listening, so the first session cannot be opened.
    assert!(matches!(
        partition.get_session().await,
        Err(RsmError::Unavailable(_))
    ));
}
