#[cfg(test)]
pub mod test_utils {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::CacheSettings;
    use crate::router::create_router;
    use crate::schemas::AppState;
    use axum::Router;
    use axum_test::TestServer;
    use compute::SyncPolicy;
    use model::store::MemoryStore;
    use tracing::Level;
    use tracing_subscriber::FmtSubscriber;

    /// A running test app plus handles on its two in-memory stores.
    pub struct TestApp {
        pub server: TestServer,
        pub state: AppState,
        pub primary: MemoryStore,
        pub secondary: MemoryStore,
    }

    /// Short backoff so deferred-sync tests finish quickly.
    pub fn test_policy() -> SyncPolicy {
        SyncPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            commit_retries: 16,
        }
    }

    /// Create AppState over two fresh in-memory stores
    pub async fn setup_test_app_state() -> (AppState, MemoryStore, MemoryStore) {
        let primary = MemoryStore::new("primary");
        let secondary = MemoryStore::new("accounting");
        let cache = CacheSettings {
            max_capacity: 100,
            ttl_secs: 60,
        };
        let state = AppState::new(
            Arc::new(primary.clone()),
            Arc::new(secondary.clone()),
            test_policy(),
            &cache,
        )
        .await
        .expect("Failed to build test app state");
        (state, primary, secondary)
    }

    /// Initialize tracing for tests with output to STDERR.
    ///
    /// The log level is determined by the RUST_LOG environment variable,
    /// defaulting to WARN if not set.
    fn init_test_tracing() -> tracing::subscriber::DefaultGuard {
        let log_level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|level| match level.to_uppercase().as_str() {
                "ERROR" => Some(Level::ERROR),
                "WARN" => Some(Level::WARN),
                "INFO" => Some(Level::INFO),
                "DEBUG" => Some(Level::DEBUG),
                "TRACE" => Some(Level::TRACE),
                _ => None,
            })
            .unwrap_or(Level::WARN);

        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Create axum app for testing
    pub async fn setup_test_app() -> Router {
        let _ = init_test_tracing();
        let (state, _, _) = setup_test_app_state().await;
        create_router(state)
    }

    /// Create a test server that keeps access to the stores behind it
    pub async fn setup_test_server() -> TestApp {
        let _ = init_test_tracing();
        let (state, primary, secondary) = setup_test_app_state().await;
        let server = TestServer::new(create_router(state.clone())).unwrap();
        TestApp {
            server,
            state,
            primary,
            secondary,
        }
    }
}
