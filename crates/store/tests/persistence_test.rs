use agent_core_common::{Agent, AgentType, Configuration, Content, MessageType};
use agent_core_store::{connect, connect_in_memory, AgentStore, MessageStore};

#[tokio::test]
async fn concurrent_saves_assign_distinct_gap_free_sequences() {
    let pool = connect_in_memory().await.unwrap();
    let agent_store = AgentStore::new(pool.clone());
    let message_store = MessageStore::new(pool);

    let agent = Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
    agent_store.insert(&agent).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = message_store.clone();
        let agent_id = agent.id;
        handles.push(tokio::spawn(async move {
            store
                .save(
                    agent_id,
                    MessageType::Assistant,
                    None,
                    Content::Text(format!("m{i}")),
                    None,
                    10,
                )
                .await
                .unwrap()
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let all = message_store.find_by_agent(agent.id).await.unwrap();
    let mut seqs: Vec<i64> = all.iter().map(|m| m.sequence_number).collect();
    seqs.sort_unstable();
    let expected: Vec<i64> = (1..=20).collect();
    assert_eq!(seqs, expected);
}

#[tokio::test]
async fn reopening_the_same_file_survives_restart() {
    let dir = tempdir();
    let db_path = format!("sqlite://{}/agents.db?mode=rwc", dir);

    let agent_id = {
        let pool = connect(&db_path).await.unwrap();
        let agent_store = AgentStore::new(pool);
        let agent = Agent::new(AgentType::Synthetic, "hi".into(), Configuration::new()).unwrap();
        agent_store.insert(&agent).await.unwrap();
        agent.id
    };

    let pool = connect(&db_path).await.unwrap();
    let agent_store = AgentStore::new(pool);
    let found = agent_store.find_by_id(agent_id).await.unwrap();
    assert!(found.is_some());

    std::fs::remove_dir_all(&dir).ok();
}

fn tempdir() -> String {
    let base = std::env::temp_dir().join(format!("agent-core-store-test-{}", std::process::id()));
    std::fs::create_dir_all(&base).unwrap();
    base.to_string_lossy().into_owned()
}
