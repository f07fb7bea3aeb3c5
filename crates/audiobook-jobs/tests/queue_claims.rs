mod common;

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use audiobook_jobs::{JobStatus, Outcome, Worker};

use common::{book, FakeEngine, FakeExtractor, FakeMuxer, TestEnv, WORKER_ID};

#[test]
fn test_claims_follow_submission_order() {
    let env = TestEnv::new();
    let ids: Vec<String> = (0..4).map(|i| env.submit(&format!("book-{}", i))).collect();

    let claimed: Vec<String> = std::iter::from_fn(|| env.store.claim_next_queued_by("solo").unwrap())
        .map(|job| job.id)
        .collect();
    assert_eq!(claimed, ids);

    for id in &ids {
        let job = env.manager.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.claimed_by.as_deref(), Some("solo"));
    }
}

#[test]
fn test_concurrent_claims_never_share_a_job() {
    let env = TestEnv::new();
    let submitted: HashSet<String> = (0..24).map(|i| env.submit(&format!("book-{}", i))).collect();

    let handles: Vec<_> = (0..4)
        .map(|w| {
            let store = env.store.reopen().unwrap();
            thread::spawn(move || {
                let worker_id = format!("worker-{}", w);
                let mut claimed = Vec::new();
                loop {
                    match store.claim_next_queued_by(&worker_id) {
                        Ok(Some(job)) => claimed.push(job.id),
                        Ok(None) => break,
                        Err(e) if e.is_busy() => thread::sleep(Duration::from_millis(5)),
                        Err(e) => panic!("claim failed: {}", e),
                    }
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "job claimed twice");
        }
    }
    assert_eq!(seen, submitted);
}

#[test]
fn test_cancel_is_idempotent_and_final() {
    let env = TestEnv::new();
    let id = env.submit("doomed");

    assert!(env.manager.cancel_job(&id).unwrap());
    assert!(!env.manager.cancel_job(&id).unwrap());
    assert!(env.store.claim_next_queued_by(WORKER_ID).unwrap().is_none());
    assert!(!env.manager.resume_job(&id).unwrap());
    assert_eq!(
        env.manager.get_job(&id).unwrap().unwrap().status,
        JobStatus::Cancelled
    );
}

#[test]
fn test_statistics_track_outcomes() {
    let env = TestEnv::new();
    let engine = FakeEngine::new();
    let mut worker = env.worker(FakeExtractor::new(book(1, 2)), engine.clone(), FakeMuxer::new());

    env.submit("first");
    env.submit("second");
    let cancelled = env.submit("third");
    env.manager.cancel_job(&cancelled).unwrap();
    worker.run_until_idle().unwrap();

    let stats = env.manager.get_statistics().unwrap();
    assert_eq!(stats["completed"].count, 2);
    assert_eq!(stats["cancelled"].count, 1);
    assert_eq!(stats["queued"].count, 0);
    assert!(stats["completed"].avg_processing_time.unwrap() > 0.0);
    assert!(stats["completed"].total_output_bytes > 0);
}

#[test]
fn test_run_loop_stops_on_shutdown() {
    let env = TestEnv::new();
    let id = env.submit("background");
    let mut worker = env.worker(FakeExtractor::new(book(2, 1)), FakeEngine::new(), FakeMuxer::new());
    let shutdown = worker.shutdown_token();
    let handle = thread::spawn(move || worker.run());

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = env.manager.get_job(&id).unwrap().unwrap().status;
        if status == JobStatus::Completed {
            break;
        }
        assert!(Instant::now() < deadline, "job did not complete, status {}", status);
        thread::sleep(Duration::from_millis(20));
    }

    shutdown.cancel();
    handle.join().unwrap();
    assert!(env.store.get_heartbeat(WORKER_ID).unwrap().is_none());
}

#[test]
fn test_worker_stops_when_its_claim_is_taken_over() {
    let env = TestEnv::new();
    let chapters = book(2, 2);
    let id = env.submit("contested");

    let engine_a = FakeEngine::new();
    let muxer = FakeMuxer::new();
    let mut worker_a = env.worker(FakeExtractor::new(chapters.clone()), engine_a.clone(), muxer.clone());

    // While worker A synthesizes its second chunk, an operator requeues the
    // job and worker B claims it.
    let operator = env.store.reopen().unwrap();
    let target = id.clone();
    engine_a.after_call(2, move || {
        operator.requeue_job(&target).unwrap();
        let claimed = operator.claim_next_queued_by("worker-b").unwrap().unwrap();
        assert_eq!(claimed.id, target);
    });

    assert_eq!(worker_a.run_until_idle().unwrap(), vec![Outcome::Abandoned]);
    assert_eq!(engine_a.calls(), 2);
    assert!(muxer.assembled().is_empty());

    let job = env.manager.get_job(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.claimed_by.as_deref(), Some("worker-b"));
    assert_eq!(job.progress.completed_chunks, 1);
    let resume = job.resume_data.unwrap();
    assert!(resume.is_chunk_completed(0, 0));
    assert!(!resume.is_chunk_completed(0, 1));

    // Worker B picks the job up again and finishes it from the checkpoint.
    env.store.requeue_job(&id).unwrap();
    let mut settings = env.settings();
    settings.worker_id = "worker-b".to_string();
    let engine_b = FakeEngine::new();
    let mut worker_b = Worker::new(
        env.store.reopen().unwrap(),
        settings,
        FakeExtractor::new(chapters),
        engine_b.clone(),
        muxer.clone(),
    );
    assert_eq!(worker_b.run_until_idle().unwrap(), vec![Outcome::Completed]);
    assert_eq!(engine_b.calls(), 3);

    let job = env.manager.get_job(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.claimed_by.as_deref(), Some("worker-b"));
}
