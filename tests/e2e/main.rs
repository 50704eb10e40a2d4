//! End-to-end tests for the board mutator and the chat stream, driven
//! through a scripted mock API and fabricated chunk streams. No network.


use anyhow::Result;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use mock_api::{Call, MockApi};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use taskdeck::board::{Board, MoveOutcome};
use taskdeck::chat::{ChatDecoder, ChatStream};
use taskdeck::store::TaskStore;
use taskdeck::task::{Task, TaskStatus};
use tokio_util::sync::CancellationToken;

fn sample_task(id: &str, title: &str, status: TaskStatus) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        due_date: None,
        assignee: None,
        status,
        created_at: now,
        updated_at: now,
        completed_at: None,
        files: None,
    }
}

fn board_with(tasks: Vec<Task>) -> (Board, Arc<MockApi>, Arc<TaskStore>) {
    let store = Arc::new(TaskStore::new());
    store.set(tasks);
    let api = Arc::new(MockApi::new());
    let board = Board::new(store.clone(), api.clone());
    (board, api, store)
}

#[tokio::test]
async fn test_move_to_same_status_is_a_noop() -> Result<()> {
    let (board, api, store) = board_with(vec![sample_task("t1", "a", TaskStatus::Pending)]);
    let before = store.get().unwrap();

    let outcome = board.move_task("t1", TaskStatus::Pending).await?;

    assert_eq!(outcome, MoveOutcome::Unchanged);
    assert!(api.calls().is_empty());
    assert!(Arc::ptr_eq(&before, &store.get().unwrap()));
    Ok(())
}

#[tokio::test]
async fn test_unknown_task_is_abandoned() -> Result<()> {
    let (board, api, _store) = board_with(vec![sample_task("t1", "a", TaskStatus::Pending)]);

    let outcome = board.move_task("ghost", TaskStatus::Completed).await?;

    assert_eq!(outcome, MoveOutcome::Abandoned);
    assert!(api.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_drop_target_is_abandoned() -> Result<()> {
    let (board, api, _store) = board_with(vec![sample_task("t1", "a", TaskStatus::Pending)]);

    assert_eq!(
        board.move_task_to("t1", None).await?,
        MoveOutcome::Abandoned
    );
    assert_eq!(
        board.move_task_to("t1", Some("trash")).await?,
        MoveOutcome::Abandoned
    );
    assert!(api.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_optimistic_patch_is_visible_while_request_is_in_flight() -> Result<()> {
    let (board, api, store) = board_with(vec![
        sample_task("t1", "a", TaskStatus::Pending),
        sample_task("t2", "b", TaskStatus::InReview),
    ]);

    let before = store.get().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    api.gate_status_on(rx);

    let board = Arc::new(board);
    let handle = {
        let board = board.clone();
        tokio::spawn(async move { board.move_task("t1", TaskStatus::InProgress).await })
    };

    // let the spawned move run up to its blocked remote call
    tokio::task::yield_now().await;

    let mid_flight = store.get().unwrap();
    assert_eq!(mid_flight[0].status, TaskStatus::InProgress);
    // every other task is untouched
    assert_eq!(mid_flight[1], before[1]);

    tx.send(()).unwrap();
    let outcome = handle.await??;
    assert_eq!(outcome, MoveOutcome::Moved);
    Ok(())
}

#[tokio::test]
async fn test_rollback_restores_previous_snapshot_on_failure() -> Result<()> {
    let (board, api, store) = board_with(vec![
        sample_task("t1", "a", TaskStatus::Pending),
        sample_task("t2", "b", TaskStatus::Completed),
    ]);
    api.queue_status(Err(anyhow::anyhow!("422 unprocessable entity")));
    let before = store.get().unwrap();

    let result = board.move_task("t1", TaskStatus::InReview).await;

    assert!(result.is_err());
    let after = store.get().unwrap();
    assert_eq!(*after, *before);
    // rollback puts back the captured snapshot itself, not a rebuild
    assert!(Arc::ptr_eq(&after, &before));
    // no refetch happened
    assert_eq!(api.count(|c| matches!(c, Call::ListTasks)), 0);
    Ok(())
}

#[tokio::test]
async fn test_success_triggers_exactly_one_refetch() -> Result<()> {
    let (board, api, store) = board_with(vec![sample_task("t1", "a", TaskStatus::Pending)]);

    // the reconciled server copy carries fields the guess could not know
    let mut server_copy = sample_task("t1", "a", TaskStatus::Completed);
    server_copy.completed_at = Some(Utc::now());
    api.queue_list(Ok(vec![server_copy.clone()]));

    let outcome = board.move_task("t1", TaskStatus::Completed).await?;

    assert_eq!(outcome, MoveOutcome::Moved);
    assert_eq!(api.count(|c| matches!(c, Call::ListTasks)), 1);
    assert_eq!(
        api.calls()[0],
        Call::ChangeStatus {
            task_id: "t1".to_string(),
            status: TaskStatus::Completed
        }
    );
    let after = store.get().unwrap();
    assert_eq!(after[0], server_copy);
    assert!(!store.is_stale());
    Ok(())
}

#[tokio::test]
async fn test_failed_refetch_keeps_optimistic_state_and_staleness() -> Result<()> {
    let (board, api, store) = board_with(vec![sample_task("t1", "a", TaskStatus::Pending)]);
    api.queue_list(Err(anyhow::anyhow!("connection reset by peer")));

    let outcome = board.move_task("t1", TaskStatus::InReview).await?;

    assert_eq!(outcome, MoveOutcome::Moved);
    assert_eq!(store.status_of("t1"), Some(TaskStatus::InReview));
    assert!(store.is_stale());
    Ok(())
}

#[tokio::test]
async fn test_moves_of_different_tasks_are_independent() -> Result<()> {
    let (board, api, store) = board_with(vec![
        sample_task("t1", "a", TaskStatus::Pending),
        sample_task("t2", "b", TaskStatus::Pending),
    ]);
    // first move fails and rolls back, second succeeds
    api.queue_status(Err(anyhow::anyhow!("503 service unavailable")));
    api.queue_status(Ok(()));
    api.queue_list(Ok(vec![
        sample_task("t1", "a", TaskStatus::Pending),
        sample_task("t2", "b", TaskStatus::InProgress),
    ]));

    assert!(board.move_task("t1", TaskStatus::InReview).await.is_err());
    assert_eq!(store.status_of("t1"), Some(TaskStatus::Pending));

    let outcome = board.move_task("t2", TaskStatus::InProgress).await?;
    assert_eq!(outcome, MoveOutcome::Moved);
    assert_eq!(store.status_of("t2"), Some(TaskStatus::InProgress));
    Ok(())
}

fn chunk_stream(chunks: Vec<&'static str>) -> impl futures::Stream<Item = Result<Bytes>> {
    async_stream::stream! {
        for chunk in chunks {
            yield Ok(Bytes::from_static(chunk.as_bytes()));
        }
    }
}

#[tokio::test]
async fn test_chat_stream_yields_growing_snapshots() -> Result<()> {
    let stream = chunk_stream(vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\ndata: [DONE]\n",
    ]);
    let mut chat = ChatStream::new(stream, ChatDecoder::new(), CancellationToken::new());

    let mut snapshots = Vec::new();
    while let Some(item) = chat.next().await {
        snapshots.push(item?);
    }

    assert_eq!(snapshots, vec!["Hel".to_string(), "Hello".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_chat_stream_split_mid_line_matches_concatenated() -> Result<()> {
    let split = chunk_stream(vec![
        "dat",
        "a: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
    ]);
    let mut chat = ChatStream::new(split, ChatDecoder::new(), CancellationToken::new());
    let mut last = String::new();
    while let Some(item) = chat.next().await {
        last = item?;
    }
    assert_eq!(last, "Hi");

    let whole = chunk_stream(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n"]);
    let mut chat = ChatStream::new(whole, ChatDecoder::new(), CancellationToken::new());
    let mut last_whole = String::new();
    while let Some(item) = chat.next().await {
        last_whole = item?;
    }
    assert_eq!(last, last_whole);
    Ok(())
}

#[tokio::test]
async fn test_chat_stream_marker_refetches_board_once() -> Result<()> {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let decoder = ChatDecoder::new().with_refetch(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // marker split across the last two chunks
    let stream = chunk_stream(vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"Edited task @ref\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"etch\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
    ]);
    let mut chat = ChatStream::new(stream, decoder, CancellationToken::new());

    let mut last = String::new();
    while let Some(item) = chat.next().await {
        last = item?;
    }

    assert_eq!(last, "Edited task ");
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_chat_stream_finish_reason_stops_consumption() -> Result<()> {
    let stream = chunk_stream(vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"done\"},\"finish_reason\":\"stop\"}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"never seen\"}}]}\n",
    ]);
    let mut chat = ChatStream::new(stream, ChatDecoder::new(), CancellationToken::new());

    let mut snapshots = Vec::new();
    while let Some(item) = chat.next().await {
        snapshots.push(item?);
    }

    assert_eq!(snapshots, vec!["done".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_chat_stream_error_keeps_partial_text() -> Result<()> {
    let stream = async_stream::stream! {
        yield Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"part\"}}]}\n",
        ));
        yield Err(anyhow::anyhow!("connection reset by peer"));
    };
    let mut chat = ChatStream::new(stream, ChatDecoder::new(), CancellationToken::new());

    assert_eq!(chat.next().await.unwrap()?, "part");
    let err = chat.next().await.unwrap();
    assert!(err.is_err());
    // the partial text is still there for the caller to show
    assert_eq!(chat.text(), "part");
    assert!(chat.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_chat_stream_cancellation_stops_yields() -> Result<()> {
    let cancel = CancellationToken::new();
    let stream = async_stream::stream! {
        yield Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"first\"}}]}\n",
        ));
        // stream would hang here forever without cancellation
        futures::future::pending::<()>().await;
        yield Ok(Bytes::from_static(b"unreachable"));
    };
    let mut chat = ChatStream::new(stream, ChatDecoder::new(), cancel.clone());

    assert_eq!(chat.next().await.unwrap()?, "first");

    let waiter = tokio::spawn(async move { chat.next().await });
    cancel.cancel();
    let next = waiter.await?;
    assert!(next.is_none());
    Ok(())
}

#[tokio::test]
async fn test_malformed_line_does_not_kill_the_stream() -> Result<()> {
    let stream = chunk_stream(vec![
        "data: {broken\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
    ]);
    let mut chat = ChatStream::new(stream, ChatDecoder::new(), CancellationToken::new());

    let mut last = String::new();
    while let Some(item) = chat.next().await {
        last = item?;
    }
    assert_eq!(last, "ok");
    Ok(())
}
