use armature::backend::BackendClient;
use armature::session::{SessionOutcome, SessionUpdate, StreamSession};
use armature::transcript::Transcript;
use armature::tui::TuiEvent;
use armature::types::{AnalyzeRequest, StreamEvent};

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

/// Emits one chunk, then keeps the connection open forever. Cancellation has
/// to win without any help from the server.
fn stalling_sse() -> Response {
    let first = Bytes::from_static(
        b"data: {\"type\": \"chunk\", \"content\": \"partial answer\", \"index\": 0}\n\n",
    );
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(4);
    let _ = tx.try_send(Ok(first));
    tokio::spawn(async move {
        // Park the sender so the body never reaches EOF.
        tx.closed().await;
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap()
}

async fn serve_stalling() -> String {
    let app = Router::new().route("/api/stream-analyze", post(|| async { stalling_sse() }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn request() -> AnalyzeRequest {
    AnalyzeRequest {
        question: "q".to_string(),
        content: String::new(),
        conversation_id: None,
    }
}

#[tokio::test]
async fn test_cancel_mid_stream_preserves_text_and_stops_promptly() {
    let base = serve_stalling().await;
    let (tx, mut rx) = broadcast::channel(64);
    let backend = BackendClient::new(reqwest::Client::new(), base.as_str());
    let session = StreamSession::new(backend, tx);
    let handle = session.handle();
    let run = tokio::spawn(session.run(request()));

    let mut transcript = Transcript::new();
    transcript.begin_exchange("q".to_string());

    // Wait for the first chunk before pulling the plug.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for the first chunk")
            .unwrap();
        if let TuiEvent::Stream { update, .. } = event {
            let is_chunk = matches!(update, SessionUpdate::Event(StreamEvent::Chunk { .. }));
            transcript.apply_update(update);
            if is_chunk {
                break;
            }
        }
    }

    handle.cancel();

    let outcome = loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("cancel did not produce a terminal update promptly")
            .unwrap();
        if let TuiEvent::Stream { update, .. } = event {
            let terminal = match &update {
                SessionUpdate::Finished(outcome) => Some(outcome.clone()),
                _ => None,
            };
            transcript.apply_update(update);
            if let Some(outcome) = terminal {
                break outcome;
            }
        }
    };

    assert_eq!(outcome, SessionOutcome::Cancelled);
    assert!(handle.is_finished());

    let text = transcript.active_text().unwrap();
    assert!(text.starts_with("partial answer"), "got: {}", text);
    assert_eq!(text.matches("(stopped by user)").count(), 1);

    run.await.unwrap();
}

#[tokio::test]
async fn test_cancel_before_any_chunk_still_settles() {
    let base = serve_stalling().await;
    let (tx, mut rx) = broadcast::channel(64);
    let backend = BackendClient::new(reqwest::Client::new(), base.as_str());
    let session = StreamSession::new(backend, tx);
    let handle = session.handle();

    handle.cancel();
    let run = tokio::spawn(session.run(request()));

    let outcome = loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("pre-cancelled session did not settle promptly")
            .unwrap();
        if let TuiEvent::Stream {
            update: SessionUpdate::Finished(outcome),
            ..
        } = event
        {
            break outcome;
        }
    };

    assert_eq!(outcome, SessionOutcome::Cancelled);
    run.await.unwrap();
}
