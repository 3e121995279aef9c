use crate::domain::{ConversionStrategy, DomainError, DomainResult};
use std::fmt;

/// Subject prefix of the inbound device stream.
pub const INBOUND_PREFIX: &str = "streaming";

/// Named output stream of a pipeline stage; rendered as `<prefix>.<projectId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    /// Decoded packets leaving the deserializer
    Packets,
    Heartbeat,
    /// Raw re-publish of derived event and alarm packets
    Realtime,
    /// Process signal for downstream automation
    Process,
    /// Packets annotated by the rule engine, ready for routing
    Enriched,
    EventStore,
    AlarmStore,
    Dlq,
    Sink(ConversionStrategy),
    Replay(ConversionStrategy),
}

impl OutputChannel {
    /// Channels that map one-to-one onto a JetStream stream of the same name.
    pub const FIXED: [OutputChannel; 8] = [
        OutputChannel::Packets,
        OutputChannel::Heartbeat,
        OutputChannel::Realtime,
        OutputChannel::Process,
        OutputChannel::Enriched,
        OutputChannel::EventStore,
        OutputChannel::AlarmStore,
        OutputChannel::Dlq,
    ];

    /// JetStream stream the channel lives on.
    pub fn stream(&self) -> &'static str {
        match self {
            OutputChannel::Packets => "packets",
            OutputChannel::Heartbeat => "heartbeat",
            OutputChannel::Realtime => "realtime",
            OutputChannel::Process => "process",
            OutputChannel::Enriched => "enriched",
            OutputChannel::EventStore => "events",
            OutputChannel::AlarmStore => "alarms",
            OutputChannel::Dlq => "dlq",
            OutputChannel::Sink(_) => "sink",
            OutputChannel::Replay(_) => "replay",
        }
    }

    pub fn prefix(&self) -> String {
        match self {
            OutputChannel::Sink(strategy) | OutputChannel::Replay(strategy) => {
                format!("{}.{}", self.stream(), strategy.tag())
            }
            _ => self.stream().to_string(),
        }
    }

    pub fn subject(&self, project_id: u64) -> String {
        format!("{}.{}", self.prefix(), project_id)
    }

    /// Every stream the pipeline publishes to or consumes from.
    pub fn all_streams() -> Vec<&'static str> {
        let mut streams: Vec<&'static str> = Self::FIXED.iter().map(|c| c.stream()).collect();
        streams.push(OutputChannel::Sink(ConversionStrategy::Telemetry).stream());
        streams.push(OutputChannel::Replay(ConversionStrategy::Telemetry).stream());
        streams.push(INBOUND_PREFIX);
        streams
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}

pub fn inbound_subject(project_id: u64) -> String {
    format!("{}.{}", INBOUND_PREFIX, project_id)
}

/// Reads the project id from the last token of `<prefix>.<projectId>`.
pub fn project_id_from_subject(subject: &str) -> DomainResult<u64> {
    subject
        .rsplit('.')
        .next()
        .filter(|_| subject.contains('.'))
        .and_then(|token| token.parse::<u64>().ok())
        .ok_or_else(|| DomainError::InvalidTopic(subject.to_string()))
}

/// Reads the strategy tag of a `sink.<tag>.<projectId>` or `replay.<tag>.<projectId>` subject.
pub fn strategy_from_subject(subject: &str) -> DomainResult<ConversionStrategy> {
    let mut parts = subject.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("sink" | "replay"), Some(tag), Some(_), None) => tag
            .parse()
            .map_err(|_| DomainError::InvalidTopic(subject.to_string())),
        _ => Err(DomainError::InvalidTopic(subject.to_string())),
    }
}

/// Message key of an inbound device message: `<deviceId>.<packetId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingKey {
    pub device_id: u64,
    pub packet_id: u64,
}

impl RoutingKey {
    pub fn parse(key: &str) -> DomainResult<Self> {
        let (device, packet) = key
            .split_once('.')
            .ok_or_else(|| DomainError::InvalidRoutingKey(key.to_string()))?;
        let device_id = device
            .parse()
            .map_err(|_| DomainError::InvalidRoutingKey(key.to_string()))?;
        let packet_id = packet
            .parse()
            .map_err(|_| DomainError::InvalidRoutingKey(key.to_string()))?;
        Ok(Self {
            device_id,
            packet_id,
        })
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device_id, self.packet_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        assert_eq!(OutputChannel::Packets.subject(4), "packets.4");
        assert_eq!(OutputChannel::EventStore.subject(4), "events.4");
        assert_eq!(
            OutputChannel::Sink(ConversionStrategy::HdfsYear).subject(4),
            "sink.hdfs-year.4"
        );
        assert_eq!(
            OutputChannel::Replay(ConversionStrategy::RuleState).subject(4),
            "replay.rule-state.4"
        );
        assert_eq!(inbound_subject(4), "streaming.4");
    }

    #[test]
    fn test_project_id_from_subject() {
        assert_eq!(project_id_from_subject("streaming.12").unwrap(), 12);
        assert_eq!(project_id_from_subject("sink.event.12").unwrap(), 12);
        assert!(project_id_from_subject("streaming").is_err());
        assert!(project_id_from_subject("streaming.abc").is_err());
    }

    #[test]
    fn test_strategy_from_subject() {
        assert_eq!(
            strategy_from_subject("replay.hdfs-day.3").unwrap(),
            ConversionStrategy::HdfsDay
        );
        assert!(strategy_from_subject("replay.unknown.3").is_err());
        assert!(strategy_from_subject("events.3").is_err());
    }

    #[test]
    fn test_routing_key() {
        let key = RoutingKey::parse("42.7").unwrap();
        assert_eq!(key.device_id, 42);
        assert_eq!(key.packet_id, 7);
        assert_eq!(key.to_string(), "42.7");
        assert!(RoutingKey::parse("42").is_err());
        assert!(RoutingKey::parse("a.7").is_err());
        assert!(RoutingKey::parse("42.7.1").is_err());
    }

    #[test]
    fn test_all_streams_are_unique() {
        let streams = OutputChannel::all_streams();
        let unique: std::collections::HashSet<_> = streams.iter().collect();
        assert_eq!(unique.len(), streams.len());
    }
}
