use ar_core::store::{IssueFilter, Store, StoreError};
use ar_core::types::{ActivityKind, Issue, IssueState, Project};
use uuid::Uuid;

async fn seeded_store() -> (Store, Project) {
    let store = Store::open_in_memory().await.expect("open store");
    let mut project = Project::new("ralph", "/srv/ralph");
    project.host_owner = "acme".into();
    project.host_repo = "ralph".into();
    store.create_project(&project).await.expect("create project");
    (store, project)
}

fn issue(project: &Project, external: &str, identifier: &str) -> Issue {
    Issue::new(project.id, external, identifier, format!("work on {identifier}"))
}

#[tokio::test]
async fn project_round_trip() {
    let (store, project) = seeded_store().await;

    let loaded = store.get_project(project.id).await.expect("get project");
    assert_eq!(loaded.name, "ralph");
    assert_eq!(loaded.default_branch, "main");

    let all = store.list_projects().await.expect("list projects");
    assert_eq!(all.len(), 1);

    let err = store.get_project(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn duplicate_project_name_is_rejected() {
    let (store, _project) = seeded_store().await;
    let again = Project::new("ralph", "/elsewhere");
    let err = store.create_project(&again).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists));
}

#[tokio::test]
async fn issue_create_and_external_id_collision() {
    let (store, project) = seeded_store().await;
    let first = issue(&project, "ext-1", "RLP-1");
    store.create_issue(&first).await.expect("create issue");

    let mut collision = issue(&project, "ext-1", "RLP-9");
    collision.id = Uuid::new_v4();
    let err = store.create_issue(&collision).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists));

    let loaded = store.get_issue(first.id).await.expect("get issue");
    assert_eq!(loaded.state, IssueState::Queued);
    assert_eq!(loaded.identifier, "RLP-1");
}

#[tokio::test]
async fn optimistic_update_detects_lost_race() {
    let (store, project) = seeded_store().await;
    let created = issue(&project, "ext-1", "RLP-1");
    store.create_issue(&created).await.expect("create issue");

    let snapshot_a = store.get_issue(created.id).await.expect("snapshot a");
    let snapshot_b = snapshot_a.clone();

    let mut a = snapshot_a;
    a.state = IssueState::Refining;
    let stored = store.update_issue(&a).await.expect("first update wins");
    assert!(stored.updated_at > snapshot_b.updated_at, "updated_at must advance");

    let mut b = snapshot_b;
    b.title = "stale edit".into();
    let err = store.update_issue(&b).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict));

    // The losing write changed nothing.
    let current = store.get_issue(created.id).await.expect("get");
    assert_eq!(current.state, IssueState::Refining);
    assert_ne!(current.title, "stale edit");
}

#[tokio::test]
async fn update_of_deleted_issue_is_not_found() {
    let (store, project) = seeded_store().await;
    let created = issue(&project, "ext-1", "RLP-1");
    store.create_issue(&created).await.expect("create issue");
    store.delete_issue(created.id).await.expect("delete");

    let err = store.update_issue(&created).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));

    let err = store.delete_issue(created.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn signals_survive_the_round_trip() {
    let (store, project) = seeded_store().await;
    let mut created = issue(&project, "ext-1", "RLP-1");
    created.signals.latest_comment_id = Some("c-7".into());
    created.signals.changes_requested = true;
    created.signals.review_id = Some("r-3".into());
    store.create_issue(&created).await.expect("create issue");

    let loaded = store.get_issue(created.id).await.expect("get");
    assert_eq!(loaded.signals.latest_comment_id.as_deref(), Some("c-7"));
    assert!(loaded.signals.changes_requested);
    assert_eq!(loaded.signals.review_id.as_deref(), Some("r-3"));
}

#[tokio::test]
async fn list_issues_filters_by_project_and_state() {
    let (store, project) = seeded_store().await;
    let other = Project::new("other", "/srv/other");
    store.create_project(&other).await.expect("create project");

    let mut a = issue(&project, "ext-1", "RLP-1");
    a.state = IssueState::Building;
    let b = issue(&project, "ext-2", "RLP-2");
    let c = issue(&other, "ext-1", "OTH-1");
    for i in [&a, &b, &c] {
        store.create_issue(i).await.expect("create");
    }

    let all = store.list_issues(IssueFilter::default()).await.expect("list");
    assert_eq!(all.len(), 3);

    let in_project = store
        .list_issues(IssueFilter {
            project_id: Some(project.id),
            state: None,
        })
        .await
        .expect("list");
    assert_eq!(in_project.len(), 2);

    let building = store
        .list_issues(IssueFilter {
            project_id: Some(project.id),
            state: Some(IssueState::Building),
        })
        .await
        .expect("list");
    assert_eq!(building.len(), 1);
    assert_eq!(building[0].id, a.id);

    let recovered = store
        .list_issues_in_state(IssueState::Building)
        .await
        .expect("list");
    assert_eq!(recovered.len(), 1);
}

#[tokio::test]
async fn open_issues_exclude_completed() {
    let (store, project) = seeded_store().await;
    let mut done = issue(&project, "ext-1", "RLP-1");
    done.state = IssueState::Completed;
    done.workspace_name = "ws-1".into();
    let pending = issue(&project, "ext-2", "RLP-2");
    store.create_issue(&done).await.expect("create");
    store.create_issue(&pending).await.expect("create");

    let open = store.list_open_issues().await.expect("open issues");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, pending.id);
}

#[tokio::test]
async fn activity_pages_newest_first_and_splits_kinds() {
    let (store, project) = seeded_store().await;
    let created = issue(&project, "ext-1", "RLP-1");
    store.create_issue(&created).await.expect("create");

    store
        .log_activity(created.id, ActivityKind::Ingested, None, None, "ingested RLP-1")
        .await
        .expect("log");
    store
        .log_activity(
            created.id,
            ActivityKind::StateChange,
            Some(IssueState::Queued),
            Some(IssueState::Refining),
            "",
        )
        .await
        .expect("log");
    for n in 0..3 {
        store
            .log_activity(
                created.id,
                ActivityKind::BuildEvent,
                None,
                None,
                format!("iteration {n}"),
            )
            .await
            .expect("log");
    }

    let page = store.list_activity(created.id, 10, 0).await.expect("page");
    assert_eq!(page.len(), 5);
    assert_eq!(page[0].detail, "iteration 2", "newest first");

    let build = store
        .list_build_activity(created.id, 10, 0)
        .await
        .expect("build page");
    assert_eq!(build.len(), 3);
    assert!(build.iter().all(|e| e.kind == ActivityKind::BuildEvent));

    let timeline = store
        .list_timeline_activity(created.id, 10, 0)
        .await
        .expect("timeline page");
    assert_eq!(timeline.len(), 2);
    assert!(timeline.iter().all(|e| e.kind != ActivityKind::BuildEvent));

    let second_page = store.list_activity(created.id, 2, 2).await.expect("page");
    assert_eq!(second_page.len(), 2);
    assert_eq!(second_page[0].detail, "iteration 0");

    let recent = store.list_recent_activity(2).await.expect("recent");
    assert_eq!(recent.len(), 2);
}

#[tokio::test]
async fn last_transition_into_finds_the_pre_pause_state() {
    let (store, project) = seeded_store().await;
    let created = issue(&project, "ext-1", "RLP-1");
    store.create_issue(&created).await.expect("create");

    store
        .log_activity(
            created.id,
            ActivityKind::StateChange,
            Some(IssueState::Queued),
            Some(IssueState::Refining),
            "",
        )
        .await
        .expect("log");
    store
        .log_activity(
            created.id,
            ActivityKind::StateChange,
            Some(IssueState::Refining),
            Some(IssueState::Paused),
            "paused by operator",
        )
        .await
        .expect("log");

    let entry = store
        .last_transition_into(created.id, IssueState::Paused)
        .await
        .expect("query")
        .expect("a pause transition exists");
    assert_eq!(entry.from_state, Some(IssueState::Refining));

    let none = store
        .last_transition_into(created.id, IssueState::Failed)
        .await
        .expect("query");
    assert!(none.is_none());
}

#[tokio::test]
async fn aggregates_count_by_project_and_state() {
    let (store, project) = seeded_store().await;
    let mut building = issue(&project, "ext-1", "RLP-1");
    building.state = IssueState::Building;
    building.workspace_name = "ws-1".into();
    let queued = issue(&project, "ext-2", "RLP-2");
    let mut failed = issue(&project, "ext-3", "RLP-3");
    failed.state = IssueState::Failed;
    for i in [&building, &queued, &failed] {
        store.create_issue(i).await.expect("create");
    }

    let active = store
        .count_active_issues_by_project()
        .await
        .expect("active counts");
    assert_eq!(active.get(&project.id), Some(&2));

    let breakdown = store
        .count_issues_by_state_for_project(project.id)
        .await
        .expect("breakdown");
    assert_eq!(breakdown.get(&IssueState::Building), Some(&1));
    assert_eq!(breakdown.get(&IssueState::Queued), Some(&1));
    assert_eq!(breakdown.get(&IssueState::Failed), Some(&1));
    assert_eq!(breakdown.get(&IssueState::Completed), None);
}
