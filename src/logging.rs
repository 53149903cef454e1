use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber used by hosts of this crate.
///
/// Honors `RUST_LOG` and always enables `open_music_core=debug`. Calling it
/// again once a subscriber is set is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::from_default_env();
    let filter = match "open_music_core=debug".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
