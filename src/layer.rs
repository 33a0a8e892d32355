// Copyright (C) 2022-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of dlt-user.
//
// dlt-user is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! A [`tracing-subscriber`] [`Layer`] that forwards [`tracing`] events to one DLT context.
//!
//! [`tracing-subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
//! [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html
//!
//! Each event becomes one verbose log record: the event's `message` field first (as UTF-8 text),
//! then every other field as a named argument of the corresponding type. Events emitted by this
//! crate itself are not forwarded.
//!
//! ```rust
//! use dlt_user::{client::Client, config::Config, layer::Layer, transport::MemoryTransport};
//! use std::sync::Arc;
//! use tracing_subscriber::layer::SubscriberExt; // Needed to get `with()`
//! use tracing_subscriber::registry::Registry;
//!
//! let client = Arc::new(Client::new(Config::default(), MemoryTransport::new()).unwrap());
//! let ctx = client.register_context("TRCG", "tracing events").unwrap();
//! let subscriber = Registry::default().with(Layer::new(client, ctx));
//! tracing::subscriber::with_default(subscriber, || {
//!     tracing::info!(speed = 88, "Hello, world!");
//! });
//! ```

use crate::{
    client::Client,
    context::Context,
    level::LogLevel,
    message::Message,
    transport::Transport,
};

use std::sync::Arc;

use tracing::Event;

// When the tracing-log feature is enabled, use NormalizeEvent to recover the original target,
// level & location of events that came from the `log` crate.
#[cfg(feature = "tracing-log")]
use tracing_log::NormalizeEvent;

/// This crate's own diagnostics: this target, or any module path beneath it
const OWN_TARGET: &str = "dlt_user";

fn is_own_target(target: &str) -> bool {
    target
        .strip_prefix(OWN_TARGET)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
}

fn default_level_mapping(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::TRACE => LogLevel::Verbose,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

enum FieldValue {
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Str(String),
}

/// Collects an event's fields so they can be written message-first.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(&'static str, FieldValue)>,
}

impl FieldVisitor {
    fn push(&mut self, field: &tracing::field::Field, value: FieldValue) {
        self.fields.push((field.name(), value));
    }
    fn write(self, msg: &mut Message<'_>) -> crate::error::Result<()> {
        if let Some(message) = self.message {
            msg.write_utf8(&message)?;
        }
        for (name, value) in self.fields {
            match value {
                FieldValue::I64(x) => msg.write_attr(x, name, None)?,
                FieldValue::U64(x) => msg.write_attr(x, name, None)?,
                FieldValue::F64(x) => msg.write_attr(x, name, None)?,
                FieldValue::Bool(x) => msg.write_attr(x, name, None)?,
                FieldValue::Str(x) => msg.write_utf8_attr(&x, name)?,
            }
        }
        Ok(())
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push(field, FieldValue::I64(value));
    }
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push(field, FieldValue::U64(value));
    }
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.push(field, FieldValue::F64(value));
    }
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.push(field, FieldValue::Bool(value));
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field, FieldValue::Str(value.to_string()));
        }
    }
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        // The tracing macros pre-format the `message` field as `std::fmt::Arguments`, whose
        // `Debug` output carries no enclosing quotes.
        let text = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.push(field, FieldValue::Str(text));
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          struct Layer                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A [`tracing-subscriber`]-compliant [`Layer`] implementation that logs [`Event`]s to a DLT
/// context.
///
/// [`tracing-subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
/// [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
/// [`Event`]: https://docs.rs/tracing/latest/tracing/struct.Event.html
pub struct Layer<T: Transport + 'static> {
    client: Arc<Client<T>>,
    context: Arc<Context>,
    map_level: Box<dyn Fn(&tracing::Level) -> LogLevel + Send + Sync>,
    with_location: bool,
}

impl<T: Transport + 'static> Layer<T> {
    pub fn new(client: Arc<Client<T>>, context: Arc<Context>) -> Layer<T> {
        Layer {
            client,
            context,
            map_level: Box::new(default_level_mapping),
            with_location: false,
        }
    }
    /// Replace the default mapping from [`tracing`] levels to DLT levels.
    pub fn with_level_mapping<F>(mut self, f: F) -> Self
    where
        F: Fn(&tracing::Level) -> LogLevel + Send + Sync + 'static,
    {
        self.map_level = Box::new(f);
        self
    }
    /// Append each event's source location, when known, as a `location` argument.
    pub fn with_location(mut self, with_location: bool) -> Self {
        self.with_location = with_location;
        self
    }
}

impl<S, T> tracing_subscriber::layer::Layer<S> for Layer<T>
where
    S: tracing::Subscriber,
    T: Transport + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        #[cfg(feature = "tracing-log")]
        let normalized_meta = event.normalized_metadata();
        #[cfg(feature = "tracing-log")]
        let meta = normalized_meta.as_ref().unwrap_or_else(|| event.metadata());
        #[cfg(not(feature = "tracing-log"))]
        let meta = event.metadata();

        if is_own_target(meta.target()) {
            return;
        }

        let location = match (self.with_location, meta.file(), meta.line()) {
            (true, Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            _ => None,
        };

        let result = self.client.log_args(
            &self.context,
            (self.map_level)(meta.level()),
            |msg| {
                let mut visitor = FieldVisitor::default();
                event.record(&mut visitor);
                visitor.write(msg)?;
                match &location {
                    Some(location) => msg.write_string_attr(location, "location"),
                    None => Ok(()),
                }
            },
        );
        match result {
            Ok(_) => (),
            Err(err) if err.is_buffer_full() => (),
            Err(err) => ::tracing::error!("dlt-user layer failed: {}", err),
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::{
        config::Config,
        decode::{Frame, Value},
        transport::MemoryTransport,
    };

    use tracing_subscriber::{
        layer::SubscriberExt, // Needed to get `with()`
        registry::Registry,
    };

    #[test]
    fn forwarding() {
        let transport = MemoryTransport::new();
        let client = Arc::new(Client::new(Config::default(), transport.clone()).unwrap());
        let ctx = client.register_context("TRCG", "").unwrap();
        let subscriber = Registry::default().with(Layer::new(client.clone(), ctx).with_location(true));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app", answer = 42, ok = true, who = "me", "Hello, {}!", "世界");
            // below the context's level
            tracing::debug!(target: "app", "not forwarded");
            // our own diagnostics
            tracing::warn!(target: "dlt_user::client", "not forwarded either");
            tracing::warn!(target: "dlt_user", "nor this");
            // merely a similar name
            tracing::info!(target: "dlt_user_app", "forwarded");
            tracing::error!(target: "app", "last");
        });

        let frames = transport.frames();
        assert_eq!(3, frames.len());
        let frame = Frame::parse(&frames[0]).unwrap();
        let args = frame.arguments().unwrap();
        assert_eq!(Value::String("Hello, 世界!".to_string()), args[0].value);
        assert_eq!(Value::SInt(42), args[1].value);
        assert_eq!(Some("answer".to_string()), args[1].name);
        assert_eq!(Value::Bool(true), args[2].value);
        assert_eq!(Value::String("me".to_string()), args[3].value);
        assert_eq!(Some("location".to_string()), args[4].name);
        let args = Frame::parse(&frames[1]).unwrap().arguments().unwrap();
        assert_eq!(Value::String("forwarded".to_string()), args[0].value);
        let frame = Frame::parse(&frames[2]).unwrap();
        assert_eq!(
            crate::header::MessageType::Log(LogLevel::Error),
            frame.message_type
        );
    }

    #[test]
    fn own_targets() {
        assert!(is_own_target("dlt_user"));
        assert!(is_own_target("dlt_user::nwtrace"));
        assert!(!is_own_target("dlt_user_app"));
        assert!(!is_own_target("dlt_userland::io"));
        assert!(!is_own_target("app::dlt_user"));
    }

    // Just enough `tracing` machinery to hand-build an event with no source location & with its
    // message declared after its other fields.
    struct TestCallsite {
        metadata: &'static tracing::Metadata<'static>,
    }
    impl tracing_core::callsite::Callsite for TestCallsite {
        fn set_interest(&self, _interest: tracing_core::subscriber::Interest) {}
        fn metadata(&self) -> &tracing::Metadata<'static> {
            self.metadata
        }
    }
    impl TestCallsite {
        pub const fn new(metadata: &'static tracing::Metadata<'static>) -> TestCallsite {
            TestCallsite { metadata }
        }
    }

    static CALLSITE: TestCallsite = {
        static METADATA: tracing::Metadata = tracing::Metadata::new(
            "test event metadata",
            "test-target",
            tracing::Level::WARN,
            None,
            None,
            Some(module_path!()),
            tracing::field::FieldSet::new(
                &["count", "message"],
                tracing_core::callsite::Identifier(&CALLSITE),
            ),
            tracing_core::metadata::Kind::EVENT,
        );
        TestCallsite::new(&METADATA)
    };

    #[test]
    fn message_first() {
        use tracing::Callsite;

        let fields = CALLSITE.metadata().fields();
        let count = fields.field("count").unwrap();
        let message = fields.field("message").unwrap();
        let values = [
            (&count, Some(&3_u64 as &dyn tracing::Value)),
            (&message, Some(&"Hello, world!" as &dyn tracing::Value)),
        ];
        let value_set = fields.value_set(&values);

        let mut visitor = FieldVisitor::default();
        Event::new(CALLSITE.metadata(), &value_set).record(&mut visitor);
        assert_eq!(Some("Hello, world!"), visitor.message.as_deref());
        assert_eq!(1, visitor.fields.len());
        assert_eq!("count", visitor.fields[0].0);
        assert!(matches!(visitor.fields[0].1, FieldValue::U64(3)));

        let transport = MemoryTransport::new();
        let client = Arc::new(Client::new(Config::default(), transport.clone()).unwrap());
        let ctx = client.register_context("TRCG", "").unwrap();
        let subscriber = Registry::default().with(Layer::new(client, ctx).with_location(true));
        tracing::subscriber::with_default(subscriber, || {
            Event::dispatch(CALLSITE.metadata(), &value_set);
        });

        let frames = transport.frames();
        assert_eq!(1, frames.len());
        let args = Frame::parse(&frames[0]).unwrap().arguments().unwrap();
        // no file or line, so no location
        assert_eq!(2, args.len());
        assert_eq!(Value::String("Hello, world!".to_string()), args[0].value);
        assert_eq!(Value::UInt(3), args[1].value);
        assert_eq!(Some("count".to_string()), args[1].name);
    }

    #[test]
    fn level_mapping() {
        let transport = MemoryTransport::new();
        let client = Arc::new(Client::new(Config::default(), transport.clone()).unwrap());
        let ctx = client.register_context("TRCG", "").unwrap();
        let layer = Layer::new(client, ctx).with_level_mapping(|_| LogLevel::Fatal);
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::trace!(target: "app", "promoted");
        });
        assert_eq!(1, transport.frames().len());
    }
}
