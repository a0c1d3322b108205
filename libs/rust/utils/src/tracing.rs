use futures::{Future, FutureExt};
use ::tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber.
///
/// `RUST_LOG` drives the filter (defaults to `info`). Set `LOG_FORMAT=json` to get
/// one JSON object per line instead of the compact console format.
pub fn setup_tracing() {
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper_util=off,reqwest=off"));

    let json = std::env::var("LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter_layer);

    let result = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stdout),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_line_number(true)
                    .compact()
                    .with_writer(std::io::stdout),
            )
            .try_init()
    };

    // A subscriber may already be installed (tests, embedding services).
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

pub async fn run_with_tracing<F, Fut>(future: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    setup_tracing();

    // Wrap the async block in a catch_unwind
    let result = std::panic::AssertUnwindSafe(future()).catch_unwind().await;

    match result {
        Ok(outcome) => {
            if let Err(e) = &outcome {
                error!(error = ?e, "Service exited with error");
            }
            outcome
        }
        Err(e) => {
            capture_panic_details(e);
            Err(anyhow::anyhow!("service panicked"))
        }
    }
}

fn capture_panic_details(e: Box<dyn std::any::Any + Send>) {
    let backtrace = backtrace::Backtrace::new();
    if let Some(s) = e.downcast_ref::<&str>() {
        error!(panic_message = *s, backtrace = ?backtrace, "Panic occurred with message");
    } else if let Some(s) = e.downcast_ref::<String>() {
        error!(panic_message = s, backtrace = ?backtrace, "Panic occurred with message");
    } else {
        error!(backtrace = ?backtrace, "Panic occurred but the payload is not a string");
    }
}
