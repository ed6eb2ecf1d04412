pub mod harness;

use std::time::Duration;

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("larder_server=debug,liblarder=debug,larder_client=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Poll `check` until it passes or the timeout elapses. Returns the final
/// outcome.
pub async fn poll_until<F, Fut>(check: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
