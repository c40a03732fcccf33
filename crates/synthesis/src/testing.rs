use leanflow_storage::{
    InMemoryStorage, ProcessConnectionRecord, ProcessStepRecord, SessionRecord, SolutionBucket,
    SolutionCardRecord, SolutionStatus, SynthesisStorage,
};

pub(crate) const SESSION: &str = "session-ap";

pub(crate) fn solution(id: &str, status: SolutionStatus, deps: &[&str]) -> SolutionCardRecord {
    SolutionCardRecord {
        id: id.to_string(),
        session_id: SESSION.to_string(),
        title: format!("Solution {}", id),
        description: None,
        bucket: SolutionBucket::Modify,
        status,
        effort_level: Some("medium".to_string()),
        recommended_wave: Some(1),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        affected_step_ids: vec!["step-1".to_string()],
    }
}

/// A session with a three-step AP process, two accepted solutions (sol-2
/// depends on sol-1) and one draft.
pub(crate) async fn seeded_storage() -> InMemoryStorage {
    let storage = InMemoryStorage::new();
    let mut snap = storage.begin_snapshot().await.unwrap();
    storage
        .insert_session(
            &mut snap,
            SessionRecord {
                id: SESSION.to_string(),
                name: "AP waste walk".to_string(),
                process_id: Some("proc-ap".to_string()),
                created_at: "2026-01-01T00:00:00Z".to_string(),
            },
        )
        .await
        .unwrap();
    for (i, (name, lane)) in [("Receive invoice", "AP"), ("Key invoice", "AP"), ("Approve", "Finance")]
        .iter()
        .enumerate()
    {
        storage
            .insert_process_step(
                &mut snap,
                ProcessStepRecord {
                    id: format!("step-{}", i + 1),
                    session_id: SESSION.to_string(),
                    name: name.to_string(),
                    lane: lane.to_string(),
                    cycle_time_minutes: Some(10.0),
                    wait_time_minutes: Some(60.0),
                },
            )
            .await
            .unwrap();
    }
    storage
        .insert_process_connection(
            &mut snap,
            ProcessConnectionRecord {
                id: "conn-1".to_string(),
                session_id: SESSION.to_string(),
                source_step_id: "step-1".to_string(),
                target_step_id: "step-2".to_string(),
            },
        )
        .await
        .unwrap();
    for record in [
        solution("sol-1", SolutionStatus::Accepted, &[]),
        solution("sol-2", SolutionStatus::Accepted, &["sol-1"]),
        solution("sol-3", SolutionStatus::Draft, &[]),
    ] {
        storage.upsert_solution(&mut snap, record).await.unwrap();
    }
    storage.commit_snapshot(snap).await.unwrap();
    storage
}
