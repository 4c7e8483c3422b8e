//! Re-export of the logging macros the crate uses.
pub use tracing::{debug, error, info, warn};

/// Install color_eyre as the global error handler, with the async runtime
/// and CLI machinery filtered out of reported backtraces.
pub fn install_color_eyre() -> color_eyre::eyre::Result<()> {
    color_eyre::config::HookBuilder::default()
        .issue_url(concat!(env!("CARGO_PKG_REPOSITORY"), "/issues/new"))
        .add_default_filters()
        .add_frame_filter(Box::new(|frames| {
            let noise = &["tokio::", "tracing::", "color_eyre::", "clap::", "<core::"];

            frames.retain(|frame| {
                let name = match frame.name.as_ref() {
                    Some(name) => name.as_str(),
                    None => return true,
                };
                !noise.iter().any(|prefix| name.starts_with(prefix))
            });
        }))
        .install()?;

    Ok(())
}
