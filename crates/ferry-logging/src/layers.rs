//! Custom tracing layers for Ferry

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{HostContextData, HostContextGuard};

/// Layer that attaches the active host context to new spans
///
/// When a [`HostContextGuard`] is live, every span opened on that thread
/// gets a [`HostContextExtension`] so formatters and later layers can read
/// which host the span belongs to.
pub struct HostContextLayer;

impl HostContextLayer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HostContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct HostContextExtension {
    pub data: HostContextData,
}

impl<S> Layer<S> for HostContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(host_ctx) = HostContextGuard::current()
        {
            span.extensions_mut()
                .insert(HostContextExtension { data: host_ctx });
        }
    }
}

/// JSONL formatting layer for file output
pub fn jsonl_file_layer<S, W>(
    writer: W,
    include_location: bool,
    include_thread_info: bool,
) -> tracing_subscriber::fmt::Layer<
    S,
    tracing_subscriber::fmt::format::JsonFields,
    tracing_subscriber::fmt::format::Format<tracing_subscriber::fmt::format::Json>,
    W,
>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .flatten_event(true)
        .with_writer(writer)
        .with_file(include_location)
        .with_line_number(include_location)
        .with_thread_ids(include_thread_info)
        .with_thread_names(include_thread_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::HostAddress;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::registry::Registry;

    /// Checks the extension from inside the span
    struct ExtensionProbe(std::sync::Arc<std::sync::atomic::AtomicBool>);

    impl<S> Layer<S> for ExtensionProbe
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
            if let Some(span) = ctx.span(id)
                && let Some(ext) = span.extensions().get::<HostContextExtension>()
                && ext.data.host == HostAddress(7)
            {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_span_carries_host_context() {
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let subscriber = Registry::default()
            .with(HostContextLayer::new())
            .with(ExtensionProbe(seen.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let _guard = HostContextGuard::new(HostAddress(7), 0.0);
            let span = tracing::info_span!("router_update");
            let _entered = span.enter();
        });
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
    }
}
