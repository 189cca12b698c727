use bytes::Bytes;
use futures::channel::oneshot;
use futures_util::stream::{self, StreamExt};
use quickcheck::quickcheck;
use rs2_multipart::{
    body_channel, CombinedStream, MultipartError, MultipartResult, OutputState, StreamEvent, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_test::{assert_pending, assert_ready};

async fn drain(combined: &mut CombinedStream) -> (Vec<u8>, Vec<MultipartError>) {
    let mut body = Vec::new();
    let mut errors = Vec::new();
    while let Some(item) = combined.next().await {
        match item {
            Ok(chunk) => body.extend_from_slice(&chunk),
            Err(e) => errors.push(e),
        }
    }
    (body, errors)
}

fn events(rx: &mut futures::channel::mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = rx.try_next() {
        out.push(event);
    }
    out
}

/// Stream that bumps `dropped` when released
struct DropGuard {
    dropped: Arc<AtomicUsize>,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

fn guarded_stream(chunk: &'static str, dropped: Arc<AtomicUsize>) -> Value {
    let guard = DropGuard { dropped };
    Value::stream(stream::iter(vec![Ok(Bytes::from_static(chunk.as_bytes()))]).map(move |item| {
        let _guard = &guard;
        item
    }))
}

#[tokio::test]
async fn test_literal_sources_concatenate_in_order() {
    let mut combined = CombinedStream::new();
    combined.append_sources(vec!["a", "bc", "", "def"]);
    combined.append(Bytes::from_static(b"-bytes"));
    combined.append(42);

    let (body, errors) = drain(&mut combined).await;
    assert!(errors.is_empty());
    assert_eq!(body, b"abcdef-bytes42");
    assert_eq!(combined.state(), OutputState::Ended);
    assert!(combined.is_destroyed());
}

#[test]
fn test_concatenation_property() {
    fn prop(chunks: Vec<Vec<u8>>) -> bool {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let mut combined = CombinedStream::new();
            for chunk in &chunks {
                combined.append(chunk.clone());
            }
            let (body, errors) = drain(&mut combined).await;
            errors.is_empty() && body == chunks.concat()
        })
    }

    quickcheck(prop as fn(Vec<Vec<u8>>) -> bool);
}

#[tokio::test]
async fn test_pending_sources_keep_append_order() {
    let (first_tx, first_rx) = oneshot::channel::<Value>();
    let (second_tx, second_rx) = oneshot::channel::<Value>();

    let mut combined = CombinedStream::new();
    combined.append("a");
    combined.append(Value::pending(async move {
        first_rx.await.map_err(MultipartError::failed)
    }));
    combined.append("b");
    combined.append(Value::pending(async move {
        second_rx.await.map_err(MultipartError::failed)
    }));
    combined.append("c");

    // Resolve the later source first
    tokio::spawn(async move {
        second_tx.send(Value::from("2")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        first_tx.send(Value::from("1")).unwrap();
    });

    let (body, errors) = drain(&mut combined).await;
    assert!(errors.is_empty());
    assert_eq!(body, b"a1b2c");
}

#[tokio::test]
async fn test_chained_pending_values_are_reclassified() {
    let mut combined = CombinedStream::new();
    combined.append(Value::pending(async {
        Ok(Value::pending(async {
            Ok(Value::list(vec![Value::from("x"), Value::pending(async { Ok(Value::from("y")) })]))
        }))
    }));
    combined.append("z");

    let (body, errors) = drain(&mut combined).await;
    assert!(errors.is_empty());
    assert_eq!(body, b"xyz");
}

#[tokio::test]
async fn test_long_chain_of_ready_pending_values() {
    let mut value = Value::from("done");
    for _ in 0..1_000 {
        let inner = value;
        value = Value::pending(async move { Ok(inner) });
    }

    let mut combined = CombinedStream::new();
    combined.append(value);

    let (body, errors) = drain(&mut combined).await;
    assert!(errors.is_empty());
    assert_eq!(body, b"done");
}

#[tokio::test]
async fn test_pending_resolving_to_nothing_is_skipped() {
    let mut combined = CombinedStream::new();
    combined.append("a");
    combined.append(Value::pending(async { Ok(Value::Null) }));
    combined.append("b");

    let (body, _) = drain(&mut combined).await;
    assert_eq!(body, b"ab");
}

#[tokio::test]
async fn test_stream_error_is_terminal_and_cancels_the_rest() {
    let dropped = Arc::new(AtomicUsize::new(0));

    let mut combined = CombinedStream::new();
    combined.append("head");
    combined.append(Value::stream(stream::iter(vec![
        Ok(Bytes::from_static(b"-ok")),
        Err(MultipartError::Source("boom".to_string())),
        Ok(Bytes::from_static(b"-never")),
    ])));
    combined.append(guarded_stream("-queued", dropped.clone()));
    combined.append("tail");
    let mut rx = combined.subscribe();

    let (body, errors) = drain(&mut combined).await;
    assert_eq!(body, b"head-ok");
    assert_eq!(errors, vec![MultipartError::Source("boom".to_string())]);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(combined.state(), OutputState::Destroyed);

    assert_eq!(
        events(&mut rx),
        vec![
            StreamEvent::Error(MultipartError::Source("boom".to_string())),
            StreamEvent::Close
        ]
    );
}

#[tokio::test]
async fn test_pending_failure_destroys_output() {
    let mut combined = CombinedStream::new();
    combined.append("a");
    combined.append(Value::pending(async {
        Err::<Value, _>(MultipartError::IO("unreachable host".to_string()))
    }));
    combined.append("b");

    assert_eq!(combined.next().await, Some(Ok(Bytes::from_static(b"a"))));
    assert_eq!(
        combined.next().await,
        Some(Err(MultipartError::IO("unreachable host".to_string())))
    );
    assert_eq!(combined.next().await, None);
    assert_eq!(combined.next().await, None);
}

#[tokio::test]
async fn test_destroy_mid_stream_cancels_every_source_once() {
    let dropped = Arc::new(AtomicUsize::new(0));

    let mut combined = CombinedStream::new();
    combined.append("first");
    for chunk in ["-one", "-two", "-three"] {
        combined.append(guarded_stream(chunk, dropped.clone()));
    }
    let mut rx = combined.subscribe();

    assert_eq!(combined.next().await, Some(Ok(Bytes::from_static(b"first"))));
    // Makes the first guarded stream current
    assert_eq!(combined.next().await, Some(Ok(Bytes::from_static(b"-one"))));

    combined.destroy(Some(MultipartError::Cancelled));
    combined.destroy(Some(MultipartError::Source("second".to_string())));
    combined.destroy(None);

    assert_eq!(dropped.load(Ordering::SeqCst), 3);
    assert_eq!(combined.stats().sources_cancelled, 3);
    assert_eq!(combined.state(), OutputState::Errored);
    assert_eq!(combined.next().await, Some(Err(MultipartError::Cancelled)));
    assert_eq!(combined.next().await, None);

    assert_eq!(
        events(&mut rx),
        vec![StreamEvent::Error(MultipartError::Cancelled), StreamEvent::Close]
    );
}

#[tokio::test]
async fn test_destroy_without_error_closes_quietly() {
    let mut combined = CombinedStream::new();
    combined.append_sources(vec!["a", "b"]);
    let mut rx = combined.subscribe();

    combined.destroy(None);
    combined.append("ignored");

    assert_eq!(combined.queued(), 0);
    assert_eq!(combined.state(), OutputState::Destroyed);
    assert_eq!(combined.next().await, None);
    assert_eq!(events(&mut rx), vec![StreamEvent::Close]);
}

#[tokio::test]
async fn test_graceful_end_signals_end_then_close() {
    let mut combined = CombinedStream::new();
    combined.append("only");
    let mut rx = combined.subscribe();

    let (body, _) = drain(&mut combined).await;
    assert_eq!(body, b"only");
    assert_eq!(events(&mut rx), vec![StreamEvent::End, StreamEvent::Close]);

    // Subscribing after the close yields nothing
    let mut late = combined.subscribe();
    assert_eq!(late.next().await, None);
}

#[tokio::test]
async fn test_reads_follow_consumer_demand() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();

    let chunks: Vec<MultipartResult<Bytes>> = (0..100)
        .map(|i| Ok(Bytes::from(format!("{i},"))))
        .collect();
    let source = stream::iter(chunks).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut combined = CombinedStream::new();
    combined.append(Value::stream(source));

    assert_eq!(combined.next().await, Some(Ok(Bytes::from_static(b"0,"))));
    assert_eq!(pulled.load(Ordering::SeqCst), 1);
    assert_eq!(combined.next().await, Some(Ok(Bytes::from_static(b"1,"))));
    assert_eq!(pulled.load(Ordering::SeqCst), 2);

    let (rest, _) = drain(&mut combined).await;
    assert_eq!(rest.iter().filter(|b| **b == b',').count(), 98);
    assert_eq!(combined.stats().chunks_forwarded, 100);
}

#[tokio::test]
async fn test_close_without_end_ends_output() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let (sender, value) = body_channel(4);

    let mut combined = CombinedStream::new();
    combined.append(value);
    combined.append(guarded_stream("-after", dropped.clone()));
    let mut rx = combined.subscribe();

    tokio::spawn(async move {
        sender.send("partial").await.unwrap();
        drop(sender);
    });

    let (body, errors) = drain(&mut combined).await;
    assert_eq!(body, b"partial");
    assert!(errors.is_empty());
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(events(&mut rx), vec![StreamEvent::End, StreamEvent::Close]);
}

#[tokio::test]
async fn test_finished_channel_advances_to_next_source() {
    let (sender, value) = body_channel(1);

    let mut combined = CombinedStream::new();
    combined.append(value);
    combined.append("|next");

    tokio::spawn(async move {
        for chunk in ["x", "y", "z"] {
            sender.send(chunk).await.unwrap();
        }
        sender.finish().await;
    });

    let (body, errors) = drain(&mut combined).await;
    assert!(errors.is_empty());
    assert_eq!(body, b"xyz|next");
}

#[tokio::test]
async fn test_aborted_channel_fails_output() {
    let (sender, value) = body_channel(1);

    let mut combined = CombinedStream::new();
    combined.append(value);

    tokio::spawn(async move {
        sender.send("x").await.unwrap();
        sender.abort(MultipartError::Source("upstream reset".to_string())).await;
    });

    let (body, errors) = drain(&mut combined).await;
    assert_eq!(body, b"x");
    assert_eq!(errors, vec![MultipartError::Source("upstream reset".to_string())]);
}

#[test]
fn test_destroy_wakes_parked_consumer() {
    let (_tx, rx) = oneshot::channel::<Value>();

    let mut combined = CombinedStream::new();
    combined.append(Value::pending(async move { rx.await.map_err(MultipartError::failed) }));

    let mut task = tokio_test::task::spawn(combined);
    assert_pending!(task.poll_next());
    assert!(!task.is_woken());

    task.destroy(None);
    assert!(task.is_woken());
    assert_eq!(assert_ready!(task.poll_next()), None);
}
