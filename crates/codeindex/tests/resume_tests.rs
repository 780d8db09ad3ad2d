//! Crash and resume behaviour: work is redone exactly where task rows say
//! it is unfinished.

mod common;

use std::sync::{Arc, Once};

use codeindex::db::code_repo::{self, NewCodeBlock};
use codeindex::db::job_repo::{self, JobStatus};
use codeindex::db::task_repo::{self, TaskKey, TaskStatus};
use codeindex::embedding::error::Result as EmbedResult;
use codeindex::{Database, Embedder, StartOutcome};

use common::{FlakyEmbedder, RecordingEmbedder, TestHarness};

/// Leaves the database as a process killed mid-run would: job running,
/// all tasks enumerated, `f1` completed with its code block, the rest
/// pending.
fn simulate_crash_after_f1(harness: &TestHarness) -> i64 {
    let engine = harness.engine(Arc::new(RecordingEmbedder::default()));
    let job_id = harness.create_job(&engine);
    job_repo::mark_running(&harness.db, job_id).unwrap();

    let a = harness.file_path("a.py");
    let b = harness.file_path("b.py");
    for (file_path, function_name) in [(&a, "f1"), (&a, "f2"), (&b, "g1")] {
        task_repo::insert_if_absent(
            &harness.db,
            &TaskKey {
                job_id,
                file_path,
                function_name,
            },
        )
        .unwrap();
    }
    job_repo::set_totals(&harness.db, job_id, 2, 3).unwrap();

    let file_id = code_repo::find_or_create_file(&harness.db, &a, None).unwrap();
    code_repo::insert_block(
        &harness.db,
        &NewCodeBlock {
            file_id,
            name: "f1",
            code: "def f1():\n    return 1",
            start_line: 1,
            end_line: 2,
            embedding: &[0.1, 0.2],
        },
    )
    .unwrap();
    task_repo::upsert_status(
        &harness.db,
        &TaskKey {
            job_id,
            file_path: &a,
            function_name: "f1",
        },
        TaskStatus::Completed,
        None,
    )
    .unwrap();
    task_repo::recompute_progress(&harness.db, job_id).unwrap();

    job_id
}

#[tokio::test]
async fn test_resume_after_crash_skips_completed_work() {
    let harness = TestHarness::with_sample_tree();
    let job_id = simulate_crash_after_f1(&harness);
    assert_eq!(harness.job(job_id).processed_functions, 1);

    let embedder = Arc::new(RecordingEmbedder::default());
    let engine = harness.restarted_engine(embedder.clone());
    let outcomes = engine.resume_all().await.unwrap();

    assert_eq!(outcomes, vec![(job_id, StartOutcome::Completed)]);
    assert_eq!(embedder.calls(), vec!["f2".to_string(), "g1".to_string()]);

    let job = harness.job(job_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_functions, 3);
    assert_eq!(job.processed_files, 2);
    assert_eq!(harness.tasks(job_id).len(), 3);
    assert_eq!(harness.blocks_named("f1"), 1);
    assert_eq!(harness.block_count(), 3);
    assert_eq!(harness.file_count(), 2);
}

#[tokio::test]
async fn test_failed_task_retried_on_resume() {
    let harness = TestHarness::with_sample_tree();
    let embedder = Arc::new(FlakyEmbedder::new(&["f2"]));
    let engine = harness.engine(embedder.clone());
    let job_id = harness.create_job(&engine);

    engine.start(job_id).await.unwrap();
    assert_eq!(harness.task(job_id, "a.py", "f2").status, TaskStatus::Failed);
    assert_eq!(harness.blocks_named("f2"), 0);
    assert_eq!(embedder.calls(), 3);

    let outcome = engine.start(job_id).await.unwrap();
    assert_eq!(outcome, StartOutcome::Completed);

    let f2 = harness.task(job_id, "a.py", "f2");
    assert_eq!(f2.status, TaskStatus::Completed);
    assert!(f2.error_message.is_none());
    assert_eq!(embedder.calls(), 4);
    assert_eq!(harness.blocks_named("f2"), 1);
    assert_eq!(harness.block_count(), 3);

    // A third run has nothing left to do.
    engine.start(job_id).await.unwrap();
    assert_eq!(embedder.calls(), 4);
    assert_eq!(harness.block_count(), 3);
    assert_eq!(harness.tasks(job_id).len(), 3);
}

#[tokio::test]
async fn test_resume_picks_up_new_functions() {
    let harness = TestHarness::with_sample_tree();
    let engine = harness.engine(Arc::new(RecordingEmbedder::default()));
    let job_id = harness.create_job(&engine);
    engine.start(job_id).await.unwrap();

    harness.write(
        "b.py",
        "def g1(x):\n    return x * 2\n\n\ndef g2():\n    return 0\n",
    );
    let embedder = Arc::new(RecordingEmbedder::default());
    let engine = harness.restarted_engine(embedder.clone());
    engine.start(job_id).await.unwrap();

    assert_eq!(embedder.calls(), vec!["g2".to_string()]);
    let job = harness.job(job_id);
    assert_eq!(job.total_functions, 4);
    assert_eq!(job.processed_functions, 4);
    assert_eq!(harness.task(job_id, "b.py", "g2").status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_resume_all_leaves_terminal_jobs_alone() {
    let harness = TestHarness::with_sample_tree();
    let engine = harness.engine(Arc::new(RecordingEmbedder::default()));
    let done = harness.create_job(&engine);
    engine.start(done).await.unwrap();
    let pending = harness.create_job(&engine);

    let embedder = Arc::new(RecordingEmbedder::default());
    let engine = harness.restarted_engine(embedder.clone());
    let outcomes = engine.resume_all().await.unwrap();

    assert_eq!(outcomes, vec![(pending, StartOutcome::Completed)]);
    assert_eq!(harness.job(pending).status, JobStatus::Completed);
    assert_eq!(embedder.calls().len(), 3);
    // Each job owns its own tasks; code blocks accumulate across jobs.
    assert_eq!(harness.tasks(done).len(), 3);
    assert_eq!(harness.tasks(pending).len(), 3);
    assert_eq!(harness.block_count(), 6);
    assert_eq!(harness.file_count(), 2);
}

#[tokio::test]
async fn test_failed_job_can_be_restarted() {
    let harness = TestHarness::new();
    let missing = harness.path().join("later");
    let engine = harness.engine(Arc::new(RecordingEmbedder::default()));
    let job_id = engine.create_job(&missing, None, None).unwrap();

    assert!(matches!(
        engine.start(job_id).await.unwrap(),
        StartOutcome::Failed(_)
    ));

    std::fs::create_dir_all(&missing).unwrap();
    std::fs::write(missing.join("m.py"), "def m():\n    pass\n").unwrap();

    assert_eq!(engine.start(job_id).await.unwrap(), StartOutcome::Completed);
    let job = harness.job(job_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_message.is_none());
    assert_eq!(job.processed_functions, 1);
}

#[tokio::test]
async fn test_restart_drops_work_for_removed_code() {
    let harness = TestHarness::with_sample_tree();
    let engine = harness.engine(Arc::new(RecordingEmbedder::default()));
    let job_id = harness.create_job(&engine);
    engine.start(job_id).await.unwrap();
    assert_eq!(harness.job(job_id).processed_functions, 3);

    harness.write("a.py", "def f1():\n    return 1\n");
    std::fs::remove_file(harness.source_dir.join("b.py")).unwrap();

    let embedder = Arc::new(RecordingEmbedder::default());
    let engine = harness.restarted_engine(embedder.clone());
    assert_eq!(engine.start(job_id).await.unwrap(), StartOutcome::Completed);

    assert!(embedder.calls().is_empty());
    let job = harness.job(job_id);
    assert_eq!(job.total_files, 1);
    assert_eq!(job.processed_files, 1);
    assert_eq!(job.total_functions, 1);
    assert_eq!(job.processed_functions, 1);
    let tasks = harness.tasks(job_id);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].function_name, "f1");
    // Code blocks already written stay in place.
    assert_eq!(harness.block_count(), 3);
}

#[tokio::test]
async fn test_resume_after_crash_with_removed_function() {
    let harness = TestHarness::with_sample_tree();
    let job_id = simulate_crash_after_f1(&harness);

    harness.write("a.py", "def f1():\n    return 1\n");

    let embedder = Arc::new(RecordingEmbedder::default());
    let engine = harness.restarted_engine(embedder.clone());
    let outcomes = engine.resume_all().await.unwrap();

    assert_eq!(outcomes, vec![(job_id, StartOutcome::Completed)]);
    assert_eq!(embedder.calls(), vec!["g1".to_string()]);

    let job = harness.job(job_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_functions, 2);
    assert_eq!(job.processed_functions, 2);
    assert_eq!(job.total_files, 2);
    assert_eq!(job.processed_files, 2);
    assert_eq!(harness.count_tasks(job_id, TaskStatus::Pending), 0);
    assert!(harness
        .tasks(job_id)
        .iter()
        .all(|task| task.function_name != "f2"));
}

/// Breaks the status column of another job the first time it is called,
/// so that job can no longer be loaded.
struct CorruptingEmbedder {
    db: Database,
    victim: i64,
    once: Once,
}

impl Embedder for CorruptingEmbedder {
    fn embed(&self, _text: &str) -> EmbedResult<Vec<f32>> {
        self.once.call_once(|| {
            self.db
                .with_conn(|conn| {
                    conn.execute(
                        "UPDATE processing_jobs SET status = 'bogus' WHERE id = ?1",
                        [self.victim],
                    )?;
                    Ok(())
                })
                .unwrap();
        });
        Ok(vec![1.0, 0.0])
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "corrupting"
    }
}

#[tokio::test]
async fn test_resume_all_continues_past_unloadable_job() {
    let harness = TestHarness::with_sample_tree();
    let engine = harness.engine(Arc::new(RecordingEmbedder::default()));
    let first = harness.create_job(&engine);
    let broken = harness.create_job(&engine);
    let last = harness.create_job(&engine);

    let engine = harness.restarted_engine(Arc::new(CorruptingEmbedder {
        db: harness.db.clone(),
        victim: broken,
        once: Once::new(),
    }));
    let outcomes = engine.resume_all().await.unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], (first, StartOutcome::Completed));
    assert_eq!(outcomes[1].0, broken);
    assert!(matches!(outcomes[1].1, StartOutcome::Failed(_)));
    assert_eq!(outcomes[2], (last, StartOutcome::Completed));
    assert_eq!(harness.job(last).status, JobStatus::Completed);
    assert_eq!(harness.job(last).processed_functions, 3);
}
