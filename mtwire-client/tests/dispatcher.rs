use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use mtwire_client::{
    DispatchError, DispatcherState, Operation, OperationKind, Output, TaskDispatcher, TaskRequest,
    TaskResponse,
};
use tokio::sync::mpsc;

fn attach(dispatcher: &TaskDispatcher) -> mpsc::UnboundedReceiver<TaskRequest> {
    let (tx, rx) = mpsc::unbounded_channel();
    dispatcher.on_backend_ready(tx);
    rx
}

fn answer(dispatcher: &TaskDispatcher, request: TaskRequest) {
    let outcome = request.operation.run().map_err(DispatchError::from);
    dispatcher.on_response(TaskResponse { task_id: request.task_id, outcome });
}

// ── Queue and flush ───────────────────────────────────────────────────────────

#[tokio::test]
async fn queued_tasks_flush_in_submission_order() {
    let dispatcher = TaskDispatcher::new(false);
    let tasks: Vec<_> = (0..5u8).map(|i| dispatcher.submit(Operation::Sha1(vec![i]))).collect();
    assert_eq!(dispatcher.state(), DispatcherState::Uninitialized);
    assert_eq!(dispatcher.queued_count(), 5);

    let mut rx = attach(&dispatcher);
    assert_eq!(dispatcher.state(), DispatcherState::Ready);
    assert_eq!(dispatcher.queued_count(), 0);

    let mut seen = Vec::new();
    while let Ok(req) = rx.try_recv() {
        seen.push(req.task_id);
        answer(&dispatcher, req);
    }
    let expected: Vec<_> = tasks.iter().map(|t| t.id()).collect();
    assert_eq!(seen, expected);

    for (i, task) in tasks.into_iter().enumerate() {
        let digest = task.await.unwrap();
        assert_eq!(digest, Output::Bytes(mtwire_crypto::sha1(&[i as u8]).to_vec()));
    }
    assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test]
async fn ready_dispatcher_sends_immediately() {
    let dispatcher = TaskDispatcher::new(false);
    let mut rx = attach(&dispatcher);
    let task = dispatcher.submit(Operation::Factorize(15));
    let req = rx.try_recv().unwrap();
    assert_eq!(req.task_id, task.id());
    assert_eq!(req.operation.kind(), OperationKind::Factorize);
    answer(&dispatcher, req);
    assert_eq!(task.await.unwrap(), Output::Factors { p: 3, q: 5 });
}

#[tokio::test]
async fn ids_are_unique_across_threads() {
    let dispatcher = Arc::new(TaskDispatcher::new(false));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let d = Arc::clone(&dispatcher);
            std::thread::spawn(move || (0..100).map(|_| d.submit(Operation::Sha1(vec![])).id()).collect::<Vec<_>>())
        })
        .collect();

    let mut ids = HashSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(ids.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(ids.len(), 800);
}

#[test]
fn submissions_racing_ready_arrive_exactly_once() {
    let dispatcher = Arc::new(TaskDispatcher::new(false));
    let start = Arc::new(Barrier::new(5));

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let d = Arc::clone(&dispatcher);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                (0..250u32).map(|i| d.submit(Operation::Sha1(i.to_be_bytes().to_vec())).id()).collect::<Vec<_>>()
            })
        })
        .collect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let d = Arc::clone(&dispatcher);
    let attacher = thread::spawn(move || {
        start.wait();
        d.on_backend_ready(tx);
    });

    attacher.join().unwrap();
    let submitted: Vec<Vec<u64>> = submitters.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(dispatcher.state(), DispatcherState::Ready);
    assert_eq!(dispatcher.queued_count(), 0);

    let mut arrived = Vec::new();
    while let Ok(req) = rx.try_recv() {
        arrived.push(req.task_id);
    }
    let unique: HashSet<_> = arrived.iter().copied().collect();
    assert_eq!(unique.len(), arrived.len(), "a task was sent twice");
    assert_eq!(arrived.len(), 1000);

    // Each submitter's tasks reach the backend in that submitter's order.
    for ids in submitted {
        let order: Vec<_> = arrived.iter().copied().filter(|id| ids.contains(id)).collect();
        assert_eq!(order, ids);
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_response_is_ignored() {
    let dispatcher = TaskDispatcher::new(false);
    let mut rx = attach(&dispatcher);
    let task = dispatcher.submit(Operation::Sha256(b"x".to_vec()));
    let id = rx.try_recv().unwrap().task_id;

    dispatcher.on_response(TaskResponse { task_id: id, outcome: Ok(Output::Bytes(vec![1])) });
    dispatcher.on_response(TaskResponse { task_id: id, outcome: Ok(Output::Bytes(vec![2])) });
    assert_eq!(task.await.unwrap(), Output::Bytes(vec![1]));
}

#[tokio::test]
async fn unknown_response_is_a_no_op() {
    let dispatcher = TaskDispatcher::new(false);
    let _rx = attach(&dispatcher);
    let _task = dispatcher.submit(Operation::Sha1(vec![]));
    dispatcher.on_response(TaskResponse { task_id: 999, outcome: Err(DispatchError::BackendLost) });
    assert_eq!(dispatcher.pending_count(), 1);
}

#[tokio::test]
async fn error_outcome_rejects_the_task() {
    let dispatcher = TaskDispatcher::new(false);
    let mut rx = attach(&dispatcher);
    let task = dispatcher.submit(Operation::GzipUncompress(vec![]));
    answer(&dispatcher, rx.try_recv().unwrap());
    match task.await {
        Err(DispatchError::Operation(e)) => assert_eq!(e.op, OperationKind::GzipUncompress),
        other => panic!("unexpected {other:?}"),
    }
}

// ── Backend loss and failure ──────────────────────────────────────────────────

#[tokio::test]
async fn backend_lost_rejects_everything_outstanding() {
    let dispatcher = TaskDispatcher::new(true);
    let rx = attach(&dispatcher);
    let a = dispatcher.submit(Operation::Sha1(vec![1]));
    let b = dispatcher.submit(Operation::Sha1(vec![2]));
    drop(rx);

    dispatcher.on_backend_lost();
    assert!(a.await.unwrap_err().is_backend_lost());
    assert!(b.await.unwrap_err().is_backend_lost());
    assert_eq!(dispatcher.pending_count(), 0);
    assert_eq!(dispatcher.state(), DispatcherState::Uninitialized);

    // A new backend can be attached afterwards.
    let _c = dispatcher.submit(Operation::Sha1(vec![3]));
    let mut rx = attach(&dispatcher);
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn closed_backend_channel_rejects_submission() {
    let dispatcher = TaskDispatcher::new(false);
    drop(attach(&dispatcher));
    let task = dispatcher.submit(Operation::Sha1(vec![]));
    assert_eq!(task.await, Err(DispatchError::BackendLost));
}

#[tokio::test]
async fn failed_backend_runs_locally_with_fallback() {
    let dispatcher = TaskDispatcher::new(true);
    let queued = dispatcher.submit(Operation::Factorize(21));
    dispatcher.on_backend_failed("spawn refused");
    assert_eq!(dispatcher.state(), DispatcherState::Failed);

    assert_eq!(queued.await.unwrap(), Output::Factors { p: 3, q: 7 });
    assert_eq!(dispatcher.factorize(35).await.unwrap(), (5, 7));

    // Readiness after failure is ignored.
    let (tx, mut rx) = mpsc::unbounded_channel();
    dispatcher.on_backend_ready(tx);
    assert_eq!(dispatcher.state(), DispatcherState::Failed);
    let _ = dispatcher.sha1(b"abc".to_vec()).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn failed_backend_rejects_without_fallback() {
    let dispatcher = TaskDispatcher::new(false);
    let queued = dispatcher.submit(Operation::Sha1(vec![]));
    dispatcher.on_backend_failed("spawn refused");

    assert_eq!(queued.await, Err(DispatchError::BackendUnavailable("spawn refused".into())));
    let later = dispatcher.sha256(Vec::<u8>::new()).await;
    assert!(matches!(later, Err(DispatchError::BackendUnavailable(_))));
}

#[tokio::test]
async fn mismatched_output_shape_is_reported() {
    let dispatcher = Arc::new(TaskDispatcher::new(false));
    let mut rx = attach(&dispatcher);

    let d = Arc::clone(&dispatcher);
    let call = tokio::spawn(async move { d.sha1(Vec::<u8>::new()).await });
    let req = loop {
        match rx.try_recv() {
            Ok(req) => break req,
            Err(_) => tokio::task::yield_now().await,
        }
    };
    dispatcher.on_response(TaskResponse { task_id: req.task_id, outcome: Ok(Output::Factors { p: 1, q: 1 }) });
    assert_eq!(call.await.unwrap(), Err(DispatchError::UnexpectedOutput(OperationKind::Sha1)));
}
