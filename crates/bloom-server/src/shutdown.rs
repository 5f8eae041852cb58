//! Graceful shutdown with a bounded drain.

use axum::Router;
use std::{future::Future, future::IntoFuture, time::Duration};
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{info, warn};

/// How serving ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every open connection finished before the deadline.
    Complete,
    /// The deadline passed with connections still open; they were dropped.
    TimedOut,
}

/// Serves `app` until `signal` resolves, then waits at most `drain` for
/// in-flight connections to finish.
pub async fn serve_until<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    drain: Duration,
) -> std::io::Result<Drain>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (started_tx, started_rx) = oneshot::channel();
    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            let _ = started_tx.send(());
        })
        .into_future();

    let deadline = async move {
        match started_rx.await {
            Ok(()) => {
                info!("Waiting up to {:?} for connections to close", drain);
                tokio::time::sleep(drain).await;
            },
            // Serving ended without a signal
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = serve => result.map(|()| Drain::Complete),
        () = deadline => {
            warn!("Connections still open after {:?}, dropping them", drain);
            Ok(Drain::TimedOut)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::time::Instant;

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(30)).await;
        "late"
    }

    async fn bound() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn test_idle_server_stops_without_waiting() {
        let (listener, _) = bound().await;
        let app = Router::new().route("/", get(|| async { "ok" }));

        let started = Instant::now();
        let drain = serve_until(listener, app, async {}, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(drain, Drain::Complete);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stuck_request_is_cut_at_the_deadline() {
        let (listener, url) = bound().await;
        let app = Router::new().route("/slow", get(slow));

        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_until(
            listener,
            app,
            async move {
                let _ = rx.await;
            },
            Duration::from_millis(200),
        ));

        let request = tokio::spawn(async move { reqwest::get(format!("{url}/slow")).await });
        // Let the request reach the handler before signalling
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        tx.send(()).unwrap();
        let drain = server.await.unwrap().unwrap();

        assert_eq!(drain, Drain::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
        request.abort();
    }
}
