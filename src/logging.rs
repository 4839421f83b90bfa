//! Stderr logging in the exact `LEVEL message` wire format.
//!
//! `tracing_subscriber`'s default formatter prints timestamps, targets, and
//! ANSI color — none of which the wire format allows, so we supply our own
//! [`FormatEvent`]. Structured fields (e.g. `retries = 3`) still render,
//! just appended after the message rather than the default span-and-field
//! layout, since callers format the `[host->vm]`/`[vm->host]` direction tag
//! directly into the message.

use std::fmt;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

struct LevelMessage;

impl<S, N> FormatEvent<S, N> for LevelMessage
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{} ", event.metadata().level())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global stderr subscriber. `verbose` lifts the DEBUG
/// suppression; it never enables TRACE, which the wire format has no level
/// for.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    // `LevelMessage` never emits ANSI escapes, so there is nothing for
    // `with_ansi` to gate; it is also unavailable once a custom
    // `event_format` replaces the builder's `Format<L, T>` type parameter.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(LevelMessage)
        .with_writer(std::io::stderr)
        .init();
}
