//! Scenarios across the client, node and consensus layers.

use std::sync::Arc;
use std::time::Duration;

use tidepool::client::PartitionClient;
use tidepool::raft::{LeaderUpdate, ReadPath};
use tidepool::service::{
    KeepAliveRequest, OpenSessionRequest, PartitionService, ProposalRequest, QueryRequest,
};
use tidepool::stream::{buffered_stream, WriteStream};
use tidepool::types::{
    PartitionRequestHeaders, ProposalOutput, ProposalRequestHeaders, QueryRequestHeaders,
    SequenceNum, SessionId,
};
use tidepool::{
    LocalNetwork, MemberId, NodeConfig, PartitionConfig, ProtocolClient, ProtocolConfig,
    ReadConsistency, RsmError, Term,
};
use tokio::sync::mpsc;

use super::fixtures::{
    address, client_config, command, query, value, CounterCommand, CounterQuery, Lossy, Node,
    PARTITION,
};

fn single_member(member: u64) -> PartitionConfig {
    PartitionConfig::new(PARTITION, vec![address(member)]).with_leader(address(member))
}

fn partition_client(network: &LocalNetwork) -> PartitionClient {
    PartitionClient::new(PARTITION, Arc::new(network.clone()), client_config())
}

fn open_request(timeout: Duration) -> OpenSessionRequest {
    OpenSessionRequest {
        headers: PartitionRequestHeaders {
            partition_id: PARTITION,
        },
        timeout,
    }
}

fn proposal(session_id: SessionId, sequence: u64, payload: Vec<u8>) -> ProposalRequest {
    ProposalRequest {
        headers: ProposalRequestHeaders {
            partition: PartitionRequestHeaders {
                partition_id: PARTITION,
            },
            session_id,
            sequence_num: SequenceNum(sequence),
        },
        payload,
    }
}

fn keep_alive(session_id: SessionId, ack: u64) -> KeepAliveRequest {
    KeepAliveRequest {
        headers: PartitionRequestHeaders {
            partition_id: PARTITION,
        },
        session_id,
        ack: SequenceNum(ack),
    }
}

async fn open(node: &Node, timeout: Duration) -> SessionId {
    let response = node
        .server
        .open_session(open_request(timeout))
        .await
        .expect("open session");
    assert_eq!(response.headers.error(), None);
    response.session_id
}

#[tokio::test]
async fn test_propose_and_query_through_the_stack() {
    tidepool::logging::init();
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);

    let client = ProtocolClient::new(Arc::new(network.clone()), client_config());
    client
        .connect(&ProtocolConfig {
            partitions: vec![single_member(1)],
        })
        .await
        .expect("connect");

    let session = client
        .partition_by(b"counter")
        .expect("partition")
        .get_session()
        .await
        .expect("session");
    let out = session
        .propose(command(CounterCommand::Add(2)))
        .await
        .expect("add");
    assert_eq!(value(&out), 2);
    let out = session
        .propose(command(CounterCommand::Add(3)))
        .await
        .expect("add");
    assert_eq!(value(&out), 5);

    let linearizable = session
        .query(query(CounterQuery::Get), ReadConsistency::Sync)
        .await
        .expect("sync read");
    let stale = session
        .query(query(CounterQuery::Get), ReadConsistency::Stale)
        .await
        .expect("stale read");
    assert_eq!(value(&linearizable), 5);
    assert_eq!(value(&stale), 5);
    assert_eq!(
        node.engine.reads(),
        vec![ReadPath::Linearizable, ReadPath::Stale]
    );

    client.close().await.expect("close");
    assert!(node.machine.sessions().is_empty());
}

#[tokio::test]
async fn test_stream_query_yields_every_output() {
    let network = LocalNetwork::new();
    let _node = Node::leader(&network, 1);
    let client = partition_client(&network);
    client.connect(&single_member(1)).await.expect("connect");
    let session = client.get_session().await.expect("session");

    for delta in [1, 2, 3] {
        session
            .propose(command(CounterCommand::Add(delta)))
            .await
            .expect("add");
    }
    let outputs = session
        .stream_query(query(CounterQuery::History), ReadConsistency::Sync)
        .await
        .expect("stream")
        .collect()
        .await
        .expect("outputs");
    let values: Vec<i64> = outputs.iter().map(|output| value(output)).collect();
    assert_eq!(values, vec![1, 3, 6]);
}

#[tokio::test]
async fn test_lost_response_is_applied_once() {
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);
    let lossy = Lossy::new(node.server.clone());
    network.bind(address(1), lossy.clone());

    let client = partition_client(&network);
    client.connect(&single_member(1)).await.expect("connect");
    let session = client.get_session().await.expect("session");

    lossy.lose_next(2);
    let out = session
        .propose(command(CounterCommand::Add(7)))
        .await
        .expect("retried until a response arrived");

    assert_eq!(value(&out), 7);
    assert_eq!(lossy.proposals(), 3);
    assert_eq!(node.applied(), 1);
    assert_eq!(node.value(), 7);
}

#[tokio::test]
async fn test_application_errors_are_not_retried() {
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);
    let lossy = Lossy::new(node.server.clone());
    network.bind(address(1), lossy.clone());

    let client = partition_client(&network);
    client.connect(&single_member(1)).await.expect("connect");
    let session = client.get_session().await.expect("session");

    let result = session.propose(command(CounterCommand::Fail)).await;
    assert!(matches!(result, Err(RsmError::Conflict(_))));
    assert_eq!(lossy.proposals(), 1);
    assert_eq!(node.applied(), 1);
}

#[tokio::test]
async fn test_registration_lives_until_apply() {
    let network = LocalNetwork::new();
    let node = Node::start(&network, 1, NodeConfig::for_member(MemberId(1)));
    node.partition.set_leader(Term(5), Some(MemberId(1)));
    node.engine
        .set_propose_delay(Some(Duration::from_millis(100)));

    let server = node.server.clone();
    let call = tokio::spawn(async move {
        server
            .open_session(open_request(Duration::from_secs(10)))
            .await
    });

    while node.registry.is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(node.registry.get(Term(5), SequenceNum(1)).is_some());

    let response = call.await.expect("join").expect("open");
    assert_eq!(response.session_id, SessionId(1));
    assert!(node.registry.is_empty());
}

#[tokio::test]
async fn test_entry_of_older_term_still_delivers() {
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);
    let session_id = open(&node, Duration::from_secs(10)).await;

    node.partition.set_leader(Term(5), Some(MemberId(1)));
    node.engine
        .set_propose_delay(Some(Duration::from_millis(50)));
    let server = node.server.clone();
    let call = tokio::spawn(async move {
        server
            .propose(proposal(session_id, 1, command(CounterCommand::Add(1))))
            .await
    });
    while node.registry.is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    // Leadership moves away while the term-5 entry is in flight; it still
    // commits and its caller is answered.
    node.partition.set_leader(Term(6), Some(MemberId(2)));

    let response = call.await.expect("join").expect("propose");
    assert_eq!(response.headers.error(), None);
    assert_eq!(value(&response.payload), 1);

    let rejected = node
        .server
        .propose(proposal(session_id, 2, command(CounterCommand::Add(1))))
        .await;
    assert!(matches!(rejected, Err(RsmError::Unavailable(_))));
    assert_eq!(node.applied(), 1);
}

#[tokio::test]
async fn test_newer_term_fails_stale_callers() {
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);
    let session_id = open(&node, Duration::from_secs(10)).await;

    let (writer, mut stale) = buffered_stream::<ProposalOutput>();
    let stream: Arc<dyn WriteStream<ProposalOutput>> = Arc::new(writer);
    node.registry.register(Term(1), stream);

    node.partition.set_leader(Term(2), Some(MemberId(1)));
    let response = node
        .server
        .propose(proposal(session_id, 1, command(CounterCommand::Add(1))))
        .await
        .expect("propose");
    assert_eq!(response.headers.error(), None);

    assert!(matches!(
        stale.receive().await,
        Some(Err(RsmError::Unavailable(_)))
    ));
    assert!(node.registry.is_empty());
}

#[tokio::test]
async fn test_follower_redirects_to_leader() {
    let network = LocalNetwork::new();
    let leader = Node::leader(&network, 1);
    let follower = Node::start(&network, 2, NodeConfig::for_member(MemberId(2)));
    follower.partition.set_leader(Term(1), Some(MemberId(1)));

    let client = partition_client(&network);
    client
        .connect(&PartitionConfig::new(
            PARTITION,
            vec![address(2), address(1)],
        ))
        .await
        .expect("connect");
    let session = client.get_session().await.expect("session");
    session
        .propose(command(CounterCommand::Add(4)))
        .await
        .expect("add");

    assert_eq!(leader.value(), 4);
    assert!(follower.engine.entries().await.is_empty());
}

#[tokio::test]
async fn test_reconfigured_client_reaches_new_leader() {
    let network = LocalNetwork::new();
    let _old = Node::leader(&network, 1);
    let new = Node::leader(&network, 2);

    let client = partition_client(&network);
    client.connect(&single_member(1)).await.expect("connect");
    network.unbind(&address(1));
    client
        .configure(&single_member(2))
        .await
        .expect("configure");

    let session = client.get_session().await.expect("session");
    session
        .propose(command(CounterCommand::Add(9)))
        .await
        .expect("add");
    assert_eq!(new.value(), 9);
    assert_eq!(new.machine.sessions(), vec![session.session_id()]);
}

#[tokio::test]
async fn test_timeout_reclaims_registration() {
    let network = LocalNetwork::new();
    let node = Node::start(
        &network,
        1,
        NodeConfig::for_member(MemberId(1)).with_propose_timeout(Duration::from_millis(20)),
    );
    node.partition.set_leader(Term(1), Some(MemberId(1)));

    let client = partition_client(&network);
    client.connect(&single_member(1)).await.expect("connect");
    let session = client.get_session().await.expect("session");

    node.engine
        .set_propose_delay(Some(Duration::from_millis(500)));
    let result = session.propose(command(CounterCommand::Add(1))).await;
    assert!(matches!(result, Err(RsmError::Timeout(_))));
    assert!(node.registry.is_empty());
    assert_eq!(node.engine.entries().await.len(), 1);
    assert_eq!(node.applied(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_session() {
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);
    let client = Arc::new(partition_client(&network));
    client.connect(&single_member(1)).await.expect("connect");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get_session().await.map(|s| s.session_id()) })
        })
        .collect();
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.expect("join").expect("session"));
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(node.machine.sessions(), ids);
}

#[tokio::test]
async fn test_idle_session_expires() {
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);
    let idle = open(&node, Duration::from_millis(50)).await;
    let active = open(&node, Duration::from_secs(10)).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let response = node
        .server
        .keep_alive(keep_alive(active, 0))
        .await
        .expect("keep alive");
    assert_eq!(response.headers.error(), None);
    assert_eq!(node.machine.sessions(), vec![active]);

    let response = node
        .server
        .propose(proposal(idle, 1, command(CounterCommand::Add(1))))
        .await
        .expect("propose");
    assert!(matches!(
        response.headers.error(),
        Some(RsmError::NotFound(_))
    ));
    assert_eq!(node.applied(), 0);
}

#[tokio::test]
async fn test_acknowledged_outputs_are_released() {
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);
    let session_id = open(&node, Duration::from_secs(10)).await;

    let first = node
        .server
        .propose(proposal(session_id, 1, command(CounterCommand::Add(3))))
        .await
        .expect("propose");
    let replay = node
        .server
        .propose(proposal(session_id, 1, command(CounterCommand::Add(3))))
        .await
        .expect("replay");
    assert_eq!(first, replay);
    assert_eq!(node.applied(), 1);

    node.server
        .keep_alive(keep_alive(session_id, 1))
        .await
        .expect("ack");
    let late = node
        .server
        .propose(proposal(session_id, 1, command(CounterCommand::Add(3))))
        .await
        .expect("late duplicate");
    assert!(matches!(late.headers.error(), Some(RsmError::Fault(_))));
    assert_eq!(node.applied(), 1);
    assert_eq!(node.value(), 3);
}

#[tokio::test]
async fn test_unknown_session_query_is_not_found() {
    let network = LocalNetwork::new();
    let node = Node::leader(&network, 1);
    let response = node
        .server
        .query(QueryRequest {
            headers: QueryRequestHeaders {
                partition: PartitionRequestHeaders {
                    partition_id: PARTITION,
                },
                session_id: SessionId(42),
                consistency: ReadConsistency::Stale,
            },
            payload: query(CounterQuery::Get),
        })
        .await
        .expect("query");
    assert!(matches!(
        response.headers.error(),
        Some(RsmError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_leader_updates_drive_readiness() {
    let network = LocalNetwork::new();
    let node = Node::start(&network, 1, NodeConfig::for_member(MemberId(1)));
    assert!(!node.partition.is_ready());

    let (tx, rx) = mpsc::channel(4);
    let task = node.protocol.spawn_leader_updates(rx);
    let mut leader = node.partition.subscribe_leader();
    tx.send(LeaderUpdate {
        partition: PARTITION,
        term: Term(3),
        leader: Some(MemberId(1)),
    })
    .await
    .expect("send");
    leader.changed().await.expect("leader change");
    assert!(node.partition.is_ready());
    assert_eq!(node.partition.leader_state().term, Term(3));

    drop(tx);
    task.await.expect("updates drained");

    open(&node, Duration::from_secs(1)).await;
}
