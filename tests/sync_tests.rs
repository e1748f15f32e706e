//! Integration tests for the live sync layer.
//!
//! Runs `LiveSync` against `MemoryStore`. Held delivery makes "before the
//! next snapshot" observable: writes land in the store while the snapshot
//! that reports them is queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use taskdeck::config::ImportConfig;
use taskdeck::error::ErrorCode;
use taskdeck::import::{FilePayload, ImportPipeline};
use taskdeck::logging::{Logger, Severity};
use taskdeck::session::{ManualClock, Session};
use taskdeck::store::{CollectionPath, DocumentStore, Filter, MemoryStore};
use taskdeck::sync::{LiveSync, MirrorState};
use taskdeck::types::{NewTask, Provenance, TaskId};

const WAIT: Duration = Duration::from_secs(5);

fn tasks_path() -> CollectionPath {
    CollectionPath::root("tasks")
}

fn descriptions_path(id: &TaskId) -> CollectionPath {
    CollectionPath::child("tasks", id.as_str(), "descriptions")
}

fn session(store: &Arc<MemoryStore>, user: &str) -> Session {
    Session::new(store.clone()).with_user(user)
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

async fn settle<F>(sync: &LiveSync, predicate: F) -> MirrorState
where
    F: FnMut(&MirrorState) -> bool,
{
    tokio::time::timeout(WAIT, sync.wait_for(predicate))
        .await
        .expect("mirror did not reach the expected state")
}

/// Poll `condition` until it holds.
async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn connect(store: &Arc<MemoryStore>, user: &str) -> LiveSync {
    let sync = LiveSync::connect(&session(store, user))
        .await
        .expect("connect");
    settle(&sync, |s| s.generation > 0).await;
    sync
}

mod snapshot_tests {
    use super::*;

    #[tokio::test]
    async fn created_task_arrives_trimmed_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;

        for input in ["Buy milk", "   padded   ", "\tTabbed\n"] {
            let id = sync.create_task(NewTask::new(input)).await.expect("create");
            let state = settle(&sync, |s| s.contains(&id)).await;

            let matching: Vec<_> = state.tasks.iter().filter(|t| t.id == id).collect();
            assert_eq!(matching.len(), 1);
            assert_eq!(matching[0].text, input.trim());
            assert!(!matching[0].completed);
        }
        assert_eq!(sync.tasks().len(), 3);
    }

    #[tokio::test]
    async fn snapshot_preserves_store_order() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;

        let mut ids = Vec::new();
        for text in ["first", "second", "third"] {
            ids.push(sync.create_task(NewTask::new(text)).await.expect("create"));
        }
        let state = settle(&sync, |s| s.tasks.len() == 3).await;
        let order: Vec<_> = state.tasks.iter().map(|t| t.id.clone()).collect();
        assert_eq!(order, ids);
    }

    #[tokio::test]
    async fn users_only_see_their_own_tasks() {
        let store = Arc::new(MemoryStore::new());
        let alice = connect(&store, "alice").await;
        let bob = connect(&store, "bob").await;

        alice.create_task(NewTask::new("alice's")).await.expect("create");
        let bob_task = bob.create_task(NewTask::new("bob's")).await.expect("create");

        let state = settle(&bob, |s| s.contains(&bob_task)).await;
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].text, "bob's");
        settle(&alice, |s| s.tasks.len() == 1).await;
    }

    #[tokio::test]
    async fn delete_disappears_on_next_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;
        let id = sync.create_task(NewTask::new("temp")).await.expect("create");
        settle(&sync, |s| s.contains(&id)).await;

        sync.delete_task(&id).await.expect("delete");
        settle(&sync, |s| !s.contains(&id)).await;

        // Deleting again is not an error.
        sync.delete_task(&id).await.expect("second delete");
    }
}

mod write_path_tests {
    use super::*;

    #[tokio::test]
    async fn toggle_twice_only_changes_mirror_on_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;
        let id = sync.create_task(NewTask::new("flip me")).await.expect("create");
        let state = settle(&sync, |s| s.contains(&id) && s.is_settled()).await;
        let original = state.task(&id).cloned().expect("task in mirror");
        assert!(!original.completed);

        store.hold_delivery();

        sync.toggle_completion(&original).await.expect("first toggle");
        assert!(!sync.state().task(&id).expect("task").completed);
        let stored = store.query(&tasks_path(), &Filter::all()).await.expect("query");
        assert_eq!(stored[0].fields["completed"], true);

        assert_eq!(store.deliver_pending(), 1);
        let state = settle(&sync, |s| s.task(&id).is_some_and(|t| t.completed)).await;
        let flipped = state.task(&id).cloned().expect("task");

        sync.toggle_completion(&flipped).await.expect("second toggle");
        assert!(sync.state().task(&id).expect("task").completed);

        store.resume_delivery();
        let state = settle(&sync, |s| s.task(&id).is_some_and(|t| !t.completed)).await;
        assert_eq!(state.task(&id).expect("task").completed, original.completed);
    }

    #[tokio::test]
    async fn create_is_not_visible_before_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;

        store.hold_delivery();
        let id = sync.create_task(NewTask::new("later")).await.expect("create");
        assert!(!sync.state().contains(&id));
        assert_eq!(store.len(&tasks_path()), 1);

        store.resume_delivery();
        settle(&sync, |s| s.contains(&id)).await;
    }

    #[tokio::test]
    async fn empty_text_rejected_without_io() {
        let store = Arc::new(MemoryStore::new());
        let (logger, mut notices) = Logger::with_channel();
        let sync = LiveSync::connect(&session(&store, "u1").with_logger(logger))
            .await
            .expect("connect");

        let err = sync.create_task(NewTask::new("  \n ")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::EmptyTaskText);
        assert_eq!(err.message, "Task text cannot be empty");
        assert!(store.is_empty(&tasks_path()));

        let notice = notices.try_recv().expect("notice");
        assert_eq!(notice.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn write_failure_surfaces_and_leaves_mirror_alone() {
        let store = Arc::new(MemoryStore::new());
        let (logger, mut notices) = Logger::with_channel();
        let sync = LiveSync::connect(&session(&store, "u1").with_logger(logger))
            .await
            .expect("connect");
        let id = sync.create_task(NewTask::new("keep")).await.expect("create");
        let before = settle(&sync, |s| s.contains(&id) && s.is_settled()).await;

        store.reject_writes(Some("insufficient permissions"));
        let task = before.task(&id).cloned().expect("task");
        let err = sync.toggle_completion(&task).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
        assert!(err.message.starts_with("Failed to update task"));

        let err = sync.delete_task(&id).await.unwrap_err();
        assert!(err.message.starts_with("Failed to delete task"));
        assert_eq!(sync.state().tasks, before.tasks);

        let severities: Vec<_> = std::iter::from_fn(|| notices.try_recv().ok())
            .map(|n| n.severity)
            .collect();
        assert_eq!(severities, [Severity::Error, Severity::Error]);
    }

    #[tokio::test]
    async fn writes_require_a_signed_in_user() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;
        sync.sign_out().await.expect("sign out");

        let err = sync.create_task(NewTask::new("nobody")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotSignedIn);
        assert!(store.is_empty(&tasks_path()));
    }
}

mod description_tests {
    use super::*;

    #[tokio::test]
    async fn description_on_create_becomes_revision_one() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;

        let id = sync
            .create_task(NewTask::new("Report").with_description("Quarterly numbers"))
            .await
            .expect("create");
        let state = settle(&sync, |s| s.description(&id).is_some() && s.is_settled()).await;
        assert_eq!(state.description(&id), Some("Quarterly numbers"));

        let revisions = store
            .query(&descriptions_path(&id), &Filter::all())
            .await
            .expect("query");
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].fields["version"], 1);
    }

    #[tokio::test]
    async fn blank_description_writes_no_revision() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;
        let id = sync
            .create_task(NewTask::new("Plain").with_description("   "))
            .await
            .expect("create");
        settle(&sync, |s| s.contains(&id) && s.is_settled()).await;
        assert!(store.is_empty(&descriptions_path(&id)));
        assert_eq!(sync.state().description(&id), None);
    }

    #[tokio::test]
    async fn versions_count_up_from_highest() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;
        let id = sync
            .create_task(NewTask::new("Doc").with_description("v1"))
            .await
            .expect("create");

        assert_eq!(sync.add_description_revision(&id, "v2").await.expect("rev"), 2);
        assert_eq!(sync.add_description_revision(&id, "v3").await.expect("rev"), 3);
        assert_eq!(store.len(&descriptions_path(&id)), 3);
    }

    #[tokio::test]
    async fn latest_timestamp_wins_regardless_of_write_order() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(at(1)));
        let sync = LiveSync::connect(&session(&store, "u1").with_clock(clock.clone()))
            .await
            .expect("connect");
        let id = sync.create_task(NewTask::new("Race")).await.expect("create");
        settle(&sync, |s| s.contains(&id)).await;

        for (secs, text) in [(5, "a"), (9, "b"), (7, "c")] {
            clock.set(at(secs));
            sync.add_description_revision(&id, text).await.expect("rev");
        }

        let state = settle(&sync, |s| s.is_settled() && s.description(&id).is_some()).await;
        assert_eq!(state.description(&id), Some("b"));
        assert_eq!(store.len(&descriptions_path(&id)), 3);
    }

    #[tokio::test]
    async fn concurrent_editors_both_land_and_later_timestamp_wins() {
        let store = Arc::new(MemoryStore::new());
        let early = Arc::new(ManualClock::new(at(100)));
        let late = Arc::new(ManualClock::new(at(101)));
        let editor_a = LiveSync::connect(&session(&store, "u1").with_clock(early))
            .await
            .expect("connect");
        let editor_b = LiveSync::connect(&session(&store, "u1").with_clock(late))
            .await
            .expect("connect");
        let id = editor_a.create_task(NewTask::new("Shared")).await.expect("create");
        settle(&editor_a, |s| s.contains(&id)).await;
        settle(&editor_b, |s| s.contains(&id)).await;

        // B writes first but carries the later timestamp.
        let (b, a) = tokio::join!(
            editor_b.add_description_revision(&id, "from b"),
            editor_a.add_description_revision(&id, "from a"),
        );
        b.expect("b revision");
        a.expect("a revision");
        assert_eq!(store.len(&descriptions_path(&id)), 2);

        // Reload through a fresh snapshot so both mirrors resolve the same revisions.
        let task = editor_a.state().task(&id).cloned().expect("task");
        editor_a.toggle_completion(&task).await.expect("toggle");
        for editor in [&editor_a, &editor_b] {
            let state = settle(editor, |s| {
                s.task(&id).is_some_and(|t| t.completed) && s.is_settled()
            })
            .await;
            assert_eq!(state.description(&id), Some("from b"));
        }
    }

    #[tokio::test]
    async fn failed_description_fetch_clears_loading() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;
        store.reject_queries(Some("offline"));

        let id = sync.create_task(NewTask::new("Unlucky")).await.expect("create");
        let state = settle(&sync, |s| s.contains(&id) && s.is_settled()).await;
        assert_eq!(state.description(&id), None);
        assert!(state.error.is_none());
    }
}

mod subscription_tests {
    use super::*;

    #[tokio::test]
    async fn subscription_error_keeps_tasks_until_next_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let (logger, mut notices) = Logger::with_channel();
        let sync = LiveSync::connect(&session(&store, "u1").with_logger(logger))
            .await
            .expect("connect");
        let id = sync.create_task(NewTask::new("survivor")).await.expect("create");
        settle(&sync, |s| s.contains(&id)).await;

        store.emit_error(&tasks_path(), "connection lost");
        let state = settle(&sync, |s| s.error.is_some()).await;
        let err = state.error.clone().expect("error");
        assert_eq!(err.code, ErrorCode::SubscriptionError);
        assert!(err.message.starts_with("Error fetching tasks"));
        assert_eq!(state.tasks.len(), 1);
        assert!(
            std::iter::from_fn(|| notices.try_recv().ok())
                .any(|n| n.severity == Severity::Error)
        );

        let second = sync.create_task(NewTask::new("after")).await.expect("create");
        let state = settle(&sync, |s| s.contains(&second)).await;
        assert!(state.error.is_none());
        assert_eq!(state.tasks.len(), 2);
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.reject_subscribe(Some("denied"));

        let err = LiveSync::connect(&session(&store, "u1")).await.err().expect("error");
        assert_eq!(err.code, ErrorCode::SubscriptionError);
    }

    #[tokio::test]
    async fn sign_out_tears_down_and_empties() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;
        let id = sync.create_task(NewTask::new("private")).await.expect("create");
        settle(&sync, |s| s.contains(&id)).await;

        sync.sign_out().await.expect("sign out");
        let state = sync.state();
        assert!(state.tasks.is_empty());
        assert!(state.descriptions.is_empty());
        assert_eq!(state.user, None);
        eventually(|| store.hub().subscriber_count(&tasks_path()) == 0).await;
        assert!(!sync.is_listening());
    }

    #[tokio::test]
    async fn same_identity_keeps_subscription() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "u1").await;
        let generation = sync.state().generation;

        sync.sign_in("u1").await.expect("sign in again");
        assert_eq!(sync.state().generation, generation);
        assert_eq!(store.hub().subscriber_count(&tasks_path()), 1);
    }

    #[tokio::test]
    async fn switching_identity_replaces_subscription() {
        let store = Arc::new(MemoryStore::new());
        let sync = connect(&store, "alice").await;
        let alice_task = sync.create_task(NewTask::new("alice")).await.expect("create");
        settle(&sync, |s| s.contains(&alice_task)).await;

        sync.sign_in("bob").await.expect("switch");
        let state = settle(&sync, |s| s.generation > 0).await;
        assert_eq!(state.user.as_ref().map(|u| u.as_str()), Some("bob"));
        assert!(state.tasks.is_empty());
        eventually(|| store.hub().subscriber_count(&tasks_path()) == 1).await;

        let bob_task = sync.create_task(NewTask::new("bob")).await.expect("create");
        let state = settle(&sync, |s| s.contains(&bob_task)).await;
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].user_id.as_str(), "bob");
    }
}

mod commit_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_and_commit_converge() {
        let store = Arc::new(MemoryStore::new());
        let ctx = session(&store, "u1");
        let sync = Arc::new(connect(&store, "u1").await);

        let pipeline = ImportPipeline::new(&ctx, ImportConfig::default());
        let lines: Vec<String> = (0..20).map(|i| format!("imported {}", i)).collect();
        pipeline.submit_files(vec![FilePayload::from_bytes("bulk.txt", lines.join("\n"))]);
        let imports = pipeline.wait_idle().await.tasks;
        assert_eq!(imports.len(), 20);

        let mut writers = Vec::new();
        for w in 0..6 {
            let sync = Arc::clone(&sync);
            writers.push(tokio::spawn(async move {
                for i in 0..10 {
                    sync.create_task(NewTask::new(format!("w{} task {}", w, i)))
                        .await
                        .expect("create");
                }
            }));
        }
        let committer = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.commit_imports(&imports).await })
        };
        for writer in writers {
            writer.await.expect("writer");
        }
        assert!(committer.await.expect("committer").is_complete());

        let state = settle(&sync, |s| s.tasks.len() == 80 && s.is_settled()).await;
        assert_eq!(store.len(&tasks_path()), 80);
        assert_eq!(
            state
                .tasks
                .iter()
                .filter(|t| t.source == Some(Provenance::FileUpload))
                .count(),
            20
        );
    }

    #[tokio::test]
    async fn partial_commit_keeps_saved_tasks() {
        let store = Arc::new(MemoryStore::new());
        let (logger, mut notices) = Logger::with_channel();
        let ctx = session(&store, "u1").with_logger(logger);
        let sync = LiveSync::connect(&ctx).await.expect("connect");
        store.reject_creates_where(|path, fields| {
            path.as_str() == "tasks" && fields.get("text").and_then(|v| v.as_str()) == Some("bad")
        });

        let pipeline = ImportPipeline::new(&ctx, ImportConfig::default());
        pipeline.submit_files(vec![FilePayload::from_bytes("list.txt", "good\nbad\nalso good\n")]);
        pipeline.wait_idle().await;

        let report = pipeline.commit_to(&sync).await.expect("commit runs");
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.failed.len(), 1);
        let err = report.error().expect("batch error");
        assert_eq!(err.code, ErrorCode::PartialCommit);
        assert_eq!(err.message, "Failed to upload tasks: 1 of 3 could not be saved");

        let summary = std::iter::from_fn(|| notices.try_recv().ok())
            .find(|n| n.message == err.message)
            .expect("batch notice");
        assert_eq!(summary.severity, Severity::Error);
        let data = summary.data.expect("notice data");
        assert_eq!(data["created"], 2);
        assert_eq!(data["failed"][0], report.failed[0].0.as_str());

        // Nothing is rolled back and the pending list is kept for another try.
        assert_eq!(store.len(&tasks_path()), 2);
        assert_eq!(pipeline.tasks().len(), 3);
    }

    #[tokio::test]
    async fn committed_imports_keep_provenance_and_flags() {
        let store = Arc::new(MemoryStore::new());
        let ctx = session(&store, "u1");
        let sync = connect(&store, "u1").await;

        let pipeline = ImportPipeline::new(&ctx, ImportConfig::default());
        pipeline.submit_files(vec![FilePayload::from_bytes(
            "tasks.csv",
            "title,due,status,notes\nFinish report,2024-02-01,done,with charts\nPlan,,,\n",
        )]);
        pipeline.wait_idle().await;

        let report = pipeline.commit_to(&sync).await.expect("commit");
        assert!(report.is_complete());
        assert!(pipeline.tasks().is_empty());

        let state = settle(&sync, |s| s.tasks.len() == 2 && s.is_settled()).await;
        let report_task = state
            .tasks
            .iter()
            .find(|t| t.text == "Finish report")
            .expect("imported task");
        assert!(report_task.completed);
        assert_eq!(report_task.source, Some(Provenance::FileUpload));
        assert_eq!(report_task.due_date.map(|d| d.to_string()).as_deref(), Some("2024-02-01"));
        assert_eq!(state.description(&report_task.id), Some("with charts"));
    }
}
