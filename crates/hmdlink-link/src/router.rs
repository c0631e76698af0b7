use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use hmdlink_frame::{MessageType, Packet};
use parking_lot::RwLock;
use tracing::{error, trace, warn};

use crate::error::{LinkError, Result};
use crate::format::{self, Message};
use crate::route::{Endpoint, Route, RouteTable, WireFormat};

#[cfg(feature = "schema")]
use crate::schema::PayloadSchemas;

/// Anything that can carry packets to an external endpoint.
pub trait Link: Send + Sync {
    fn send(&self, message_type: MessageType, payload: &[u8]) -> Result<()>;

    fn is_connected(&self) -> bool {
        true
    }
}

/// Callback for locally delivered messages.
///
/// Runs on the delivering thread and must not block; enqueue and return.
pub type LocalHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Snapshot of router counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub delivered_locally: u64,
    pub sent: u64,
    pub passed_through: u64,
    pub no_route: u64,
    pub invalid_route: u64,
    pub wrong_origin: u64,
    pub decode_failures: u64,
    pub encode_failures: u64,
    pub no_handler: u64,
    pub no_link: u64,
    pub send_failures: u64,
}

impl RouterStats {
    pub fn dropped(&self) -> u64 {
        self.no_route
            + self.invalid_route
            + self.wrong_origin
            + self.decode_failures
            + self.encode_failures
            + self.no_handler
            + self.no_link
            + self.send_failures
    }
}

#[derive(Default)]
struct Counters {
    delivered_locally: AtomicU64,
    sent: AtomicU64,
    passed_through: AtomicU64,
    no_route: AtomicU64,
    invalid_route: AtomicU64,
    wrong_origin: AtomicU64,
    decode_failures: AtomicU64,
    encode_failures: AtomicU64,
    no_handler: AtomicU64,
    no_link: AtomicU64,
    send_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Routes messages between this process and external links.
///
/// The route table is fixed at construction. Every failure drops the single
/// message, is counted, logged, and returned to the caller.
pub struct MessageRouter {
    table: RouteTable,
    handlers: RwLock<HashMap<MessageType, LocalHandler>>,
    links: RwLock<HashMap<Endpoint, Arc<dyn Link>>>,
    #[cfg(feature = "schema")]
    schemas: Option<PayloadSchemas>,
    counters: Counters,
}

impl MessageRouter {
    pub fn new(table: RouteTable) -> Self {
        Self {
            table,
            handlers: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            #[cfg(feature = "schema")]
            schemas: None,
            counters: Counters::default(),
        }
    }

    /// Validate decoded JSON payloads before delivery.
    #[cfg(feature = "schema")]
    pub fn with_schemas(mut self, schemas: PayloadSchemas) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Register the local handler for a message type, replacing any previous one.
    pub fn register_handler(&self, message_type: MessageType, handler: LocalHandler) {
        self.handlers.write().insert(message_type, handler);
    }

    pub fn attach_link(&self, endpoint: Endpoint, link: Arc<dyn Link>) {
        self.links.write().insert(endpoint, link);
    }

    pub fn detach_link(&self, endpoint: Endpoint) -> Option<Arc<dyn Link>> {
        self.links.write().remove(&endpoint)
    }

    /// Encode a locally produced message and send it along its route.
    pub fn route_outbound(&self, message_type: MessageType, message: &Message) -> Result<()> {
        let route = self.lookup(message_type)?;
        self.check_origin(message_type, &route, Endpoint::Process)?;

        let payload = format::encode(route.format, message).map_err(|err| {
            bump(&self.counters.encode_failures);
            error!(packet_type = %message_type, format = %route.format, error = %err, "encode failed; dropping");
            err
        })?;

        self.forward(message_type, route.target, &payload)?;
        bump(&self.counters.sent);
        trace!(packet_type = %message_type, target = %route.target, bytes = payload.len(), "sent");
        Ok(())
    }

    /// Deliver a payload that arrived from `origin`.
    ///
    /// Decodes and hands it to the local handler when the route ends here;
    /// otherwise relays the bytes unchanged to the route's target.
    pub fn route_inbound(
        &self,
        origin: Endpoint,
        message_type: MessageType,
        payload: Bytes,
    ) -> Result<()> {
        let route = self.lookup(message_type)?;
        self.check_origin(message_type, &route, origin)?;

        if !route.decodes_locally() {
            self.forward(message_type, route.target, &payload)?;
            bump(&self.counters.passed_through);
            return Ok(());
        }

        let message = self.decode(message_type, route.format, payload)?;
        let handler = self.handlers.read().get(&message_type).cloned();
        match handler {
            Some(handler) => {
                handler(&message);
                bump(&self.counters.delivered_locally);
                Ok(())
            }
            None => {
                bump(&self.counters.no_handler);
                warn!(packet_type = %message_type, "no local handler; dropping");
                Err(LinkError::NoHandler(message_type))
            }
        }
    }

    /// [`MessageRouter::route_inbound`] for a decoded packet.
    pub fn route_packet(&self, origin: Endpoint, packet: Packet) -> Result<()> {
        self.route_inbound(origin, packet.message_type, packet.payload)
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RouterStats {
            delivered_locally: load(&c.delivered_locally),
            sent: load(&c.sent),
            passed_through: load(&c.passed_through),
            no_route: load(&c.no_route),
            invalid_route: load(&c.invalid_route),
            wrong_origin: load(&c.wrong_origin),
            decode_failures: load(&c.decode_failures),
            encode_failures: load(&c.encode_failures),
            no_handler: load(&c.no_handler),
            no_link: load(&c.no_link),
            send_failures: load(&c.send_failures),
        }
    }

    fn lookup(&self, message_type: MessageType) -> Result<Route> {
        let Some(route) = self.table.get(message_type) else {
            bump(&self.counters.no_route);
            warn!(packet_type = %message_type, mode = %self.table.mode(), "no route; dropping");
            return Err(LinkError::NoRoute(message_type));
        };
        if !route.is_valid() {
            bump(&self.counters.invalid_route);
            warn!(packet_type = %message_type, endpoint = %route.source, "route source equals target; dropping");
            return Err(LinkError::InvalidRoute(message_type));
        }
        Ok(route)
    }

    fn check_origin(&self, message_type: MessageType, route: &Route, origin: Endpoint) -> Result<()> {
        if route.source == origin {
            return Ok(());
        }
        bump(&self.counters.wrong_origin);
        warn!(packet_type = %message_type, %origin, expected = %route.source, "unexpected origin; dropping");
        Err(LinkError::WrongOrigin {
            message_type,
            origin,
            expected: route.source,
        })
    }

    fn decode(&self, message_type: MessageType, wire: WireFormat, payload: Bytes) -> Result<Message> {
        let decoded = format::decode(wire, payload).and_then(|message| {
            #[cfg(feature = "schema")]
            if let (Some(schemas), Message::Json(value)) = (&self.schemas, &message) {
                schemas.validate(message_type, value)?;
            }
            Ok(message)
        });
        decoded.map_err(|err| {
            bump(&self.counters.decode_failures);
            error!(packet_type = %message_type, format = %wire, error = %err, "decode failed; dropping");
            err
        })
    }

    fn forward(&self, message_type: MessageType, target: Endpoint, payload: &[u8]) -> Result<()> {
        let link = self.links.read().get(&target).cloned();
        let Some(link) = link else {
            bump(&self.counters.no_link);
            warn!(packet_type = %message_type, %target, "no link attached; dropping");
            return Err(LinkError::NoLink(target));
        };
        link.send(message_type, payload).map_err(|err| {
            bump(&self.counters.send_failures);
            warn!(packet_type = %message_type, %target, error = %err, "link send failed; dropping");
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::route::OperatingMode;

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<(MessageType, Vec<u8>)>>,
    }

    impl Link for RecordingLink {
        fn send(&self, message_type: MessageType, payload: &[u8]) -> Result<()> {
            self.sent.lock().push((message_type, payload.to_vec()));
            Ok(())
        }
    }

    fn router(mode: OperatingMode) -> (MessageRouter, Arc<RecordingLink>) {
        let router = MessageRouter::new(RouteTable::for_mode(mode));
        let link = Arc::new(RecordingLink::default());
        router.attach_link(Endpoint::Stream, link.clone());
        (router, link)
    }

    fn recording_handler() -> (LocalHandler, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: LocalHandler = Arc::new(move |message: &Message| sink.lock().push(message.clone()));
        (handler, seen)
    }

    #[test]
    fn outbound_json_is_encoded_and_sent() {
        let (router, link) = router(OperatingMode::Companion);
        router
            .route_outbound(MessageType::Control, &Message::Json(json!({"command": "ping"})))
            .unwrap();

        let sent = link.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, MessageType::Control);
        let value: serde_json::Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(value, json!({"command": "ping"}));
        assert_eq!(router.stats().sent, 1);
    }

    #[test]
    fn outbound_of_inbound_only_type_is_dropped() {
        let (router, link) = router(OperatingMode::Companion);
        let err = router
            .route_outbound(MessageType::Imu, &Message::Raw(Bytes::from_static(&[0; 12])))
            .unwrap_err();
        assert!(matches!(err, LinkError::WrongOrigin { .. }));
        assert!(link.sent.lock().is_empty());
    }

    #[test]
    fn inbound_json_decoded_for_local_handler() {
        let (router, _link) = router(OperatingMode::Companion);
        let (handler, seen) = recording_handler();
        router.register_handler(MessageType::Config, handler);

        router
            .route_inbound(
                Endpoint::Stream,
                MessageType::Config,
                Bytes::from_static(br#"{"key":"imu.beta_still","value":0.2}"#),
            )
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].as_json().unwrap()["key"], "imu.beta_still");
    }

    #[test]
    fn malformed_payload_drops_single_message_only() {
        let (router, _link) = router(OperatingMode::Companion);
        let (handler, seen) = recording_handler();
        router.register_handler(MessageType::Log, handler);

        let bad = router.route_inbound(Endpoint::Stream, MessageType::Log, Bytes::from_static(b"{oops"));
        assert!(matches!(bad, Err(LinkError::Json(_))));
        router
            .route_inbound(
                Endpoint::Stream,
                MessageType::Log,
                Bytes::from_static(br#"{"level":"info","message":"ok"}"#),
            )
            .unwrap();

        assert_eq!(seen.lock().len(), 1);
        let stats = router.stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.delivered_locally, 1);
    }

    #[test]
    fn standalone_log_passes_through_unchanged() {
        let (router, link) = router(OperatingMode::Standalone);
        let raw = Bytes::from_static(b"\x00not-json\xff");
        router
            .route_inbound(Endpoint::LocalPeripheral, MessageType::Log, raw.clone())
            .unwrap();

        assert_eq!(*link.sent.lock(), vec![(MessageType::Log, raw.to_vec())]);
        assert_eq!(router.stats().passed_through, 1);
    }

    #[test]
    fn inbound_from_wrong_origin_is_dropped() {
        let (router, _link) = router(OperatingMode::Standalone);
        let err = router
            .route_inbound(Endpoint::Stream, MessageType::Imu, Bytes::from_static(&[0; 12]))
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::WrongOrigin {
                origin: Endpoint::Stream,
                expected: Endpoint::LocalPeripheral,
                ..
            }
        ));
    }

    #[test]
    fn missing_and_invalid_routes() {
        let table = RouteTable::from_routes(
            OperatingMode::Companion,
            [(
                MessageType::Log,
                Route::new(Endpoint::Stream, Endpoint::Stream, WireFormat::Raw),
            )],
        );
        let router = MessageRouter::new(table);

        assert!(matches!(
            router.route_inbound(Endpoint::Stream, MessageType::Log, Bytes::new()),
            Err(LinkError::InvalidRoute(MessageType::Log))
        ));
        assert!(matches!(
            router.route_inbound(Endpoint::Stream, MessageType::Imu, Bytes::new()),
            Err(LinkError::NoRoute(MessageType::Imu))
        ));
        let stats = router.stats();
        assert_eq!((stats.invalid_route, stats.no_route), (1, 1));
        assert_eq!(stats.dropped(), 2);
    }

    #[test]
    fn missing_handler_and_link_are_counted() {
        let router = MessageRouter::new(RouteTable::for_mode(OperatingMode::Companion));
        assert!(matches!(
            router.route_inbound(Endpoint::Stream, MessageType::EyeVectors, Bytes::from_static(&[0; 16])),
            Err(LinkError::NoHandler(MessageType::EyeVectors))
        ));
        assert!(matches!(
            router.route_outbound(
                MessageType::GazeDistance,
                &Message::Raw(Bytes::copy_from_slice(&2.0f32.to_le_bytes()))
            ),
            Err(LinkError::NoLink(Endpoint::Stream))
        ));
    }

    #[test]
    fn raw_messages_cannot_take_json_routes() {
        let (router, link) = router(OperatingMode::Companion);
        let err = router
            .route_outbound(MessageType::SceneMarkers, &Message::Raw(Bytes::from_static(b"[]")))
            .unwrap_err();
        assert!(matches!(err, LinkError::FormatMismatch { .. }));
        assert!(link.sent.lock().is_empty());
        assert_eq!(router.stats().encode_failures, 1);
    }

    #[cfg(feature = "schema")]
    #[test]
    fn schema_failures_are_decode_failures() {
        let router = MessageRouter::new(RouteTable::for_mode(OperatingMode::Companion))
            .with_schemas(PayloadSchemas::builtin().unwrap());
        let (handler, seen) = recording_handler();
        router.register_handler(MessageType::Log, handler);

        let err = router
            .route_inbound(Endpoint::Stream, MessageType::Log, Bytes::from_static(br#"{"level":1}"#))
            .unwrap_err();
        assert!(matches!(err, LinkError::Schema { .. }));
        assert!(seen.lock().is_empty());
        assert_eq!(router.stats().decode_failures, 1);
    }
}
