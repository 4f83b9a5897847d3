use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub type SubscriberError = tracing::subscriber::SetGlobalDefaultError;

/// Installs a fmt subscriber writing to stderr as the global default.
///
/// Stdout stays free for whatever report the binary prints.
pub fn init_stderr_subscriber(max_level: Level) -> Result<(), SubscriberError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
