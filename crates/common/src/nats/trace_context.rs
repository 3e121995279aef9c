//! W3C trace-context propagation across pipeline stages.
//!
//! Every stage hop is a JetStream publish followed by a pull on the next
//! stage, so the `traceparent`/`tracestate` pair travels in the message
//! headers next to `Message-Key` and `Source-Id`.

use async_nats::HeaderMap;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    Context,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

struct HeaderCarrier<'a>(&'a mut HeaderMap);

impl Injector for HeaderCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value.as_str());
    }
}

struct HeaderSource<'a>(&'a HeaderMap);

impl Extractor for HeaderSource<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        [TRACEPARENT_HEADER, TRACESTATE_HEADER]
            .into_iter()
            .filter(|key| self.0.get(*key).is_some())
            .collect()
    }
}

/// Writes the current span's context into outgoing headers. A no-op when no
/// propagator is installed (telemetry export disabled).
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let ctx = tracing::Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut HeaderCarrier(headers))
    });
}

pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderSource(headers)))
}

/// Parents the current span on the publishing stage's span.
pub fn set_parent_from_headers(headers: &HeaderMap) {
    tracing::Span::current().set_parent(extract_trace_context(headers));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MESSAGE_KEY_HEADER, SOURCE_ID_HEADER};

    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_source_lists_only_present_trace_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_KEY_HEADER, "9.12");
        headers.insert(SOURCE_ID_HEADER, "deserializer");
        assert!(HeaderSource(&headers).keys().is_empty());

        headers.insert(TRACEPARENT_HEADER, TRACEPARENT);
        let source = HeaderSource(&headers);
        assert_eq!(source.keys(), vec![TRACEPARENT_HEADER]);
        assert_eq!(source.get(TRACEPARENT_HEADER), Some(TRACEPARENT));
    }

    #[test]
    fn test_carrier_writes_header() {
        let mut headers = HeaderMap::new();
        HeaderCarrier(&mut headers).set(TRACESTATE_HEADER, "vendor=1".to_string());
        assert_eq!(
            headers.get(TRACESTATE_HEADER).map(|v| v.as_str()),
            Some("vendor=1")
        );
    }

    #[test]
    fn test_stage_hop_without_propagator_keeps_pipeline_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(SOURCE_ID_HEADER, "rule-engine");

        inject_trace_context(&mut headers);
        set_parent_from_headers(&headers);

        assert_eq!(
            headers.get(SOURCE_ID_HEADER).map(|v| v.as_str()),
            Some("rule-engine")
        );
    }
}
