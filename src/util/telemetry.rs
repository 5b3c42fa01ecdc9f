//! Tracing setup for the scheduler process and its workers.

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Install the scheduler's env-filtered subscriber on stdout. A no-op when
/// the embedding host already set a subscriber up.
pub fn init_tracing() {
    install(std::io::stdout);
}

/// Subscriber for worker processes. Stdout carries the batch protocol, so
/// worker logs must go to stderr (inherited from the scheduler process).
pub fn init_worker_tracing() {
    install(std::io::stderr);
}

fn install<W>(writer: W)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .try_init();
}
