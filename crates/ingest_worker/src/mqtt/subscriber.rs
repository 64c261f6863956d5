use crate::handoff::HandoffSender;
use crate::mqtt::event_source::EventSource;
use crate::mqtt::{validate_topic_filter, MqttConfig, StoreMode};
use common::domain::{DomainError, DomainResult, RawMessage};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Outgoing, Packet,
    Publish, SubscribeReasonCode,
};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

/// Capacity of rumqttc's client request queue.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Subscription to the sensor topic.
///
/// Owns the MQTT client and the task driving its event loop. Every
/// incoming publish is handed to the reading processor through the handoff
/// channel; when the processor is busy the driver waits, which in turn
/// stops the event loop from reading further packets.
pub struct MqttIntake {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

impl MqttIntake {
    /// Connect, subscribe and start delivering messages to `handoff`.
    ///
    /// Fails on an invalid configuration, a refused or timed-out connection
    /// and a rejected subscription. Nothing is retried.
    #[instrument(
        name = "mqtt_intake_start",
        skip_all,
        fields(
            broker_url = %config.broker_url,
            topic = %config.topic,
            qos = config.qos,
        )
    )]
    pub async fn start(config: &MqttConfig, handoff: HandoffSender) -> DomainResult<Self> {
        validate_topic_filter(&config.topic)?;
        let qos = config.qos_level()?;
        let client_id = config.validated_client_id()?;
        let (host, port) = config.broker_address()?;
        prepare_store(&config.store_mode()?).await?;

        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(config.clean_session);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        // Publishes that arrive before SUBACK (queued for a persistent
        // session) are held here and delivered first.
        let mut early = Vec::new();

        let session_present = with_startup_timeout(
            config.connect_timeout,
            "CONNACK",
            await_connack(&mut eventloop, &mut early),
        )
        .await?;
        info!(
            broker_url = %config.broker_url,
            session_present,
            "connected to MQTT broker"
        );

        client
            .subscribe(config.topic.as_str(), qos)
            .await
            .map_err(|e| DomainError::MqttSubscriptionError(e.to_string()))?;

        with_startup_timeout(
            config.connect_timeout,
            "SUBACK",
            await_suback(&mut eventloop, &mut early),
        )
        .await?;
        info!(
            topic = %config.topic,
            broker_url = %config.broker_url,
            "successfully subscribed"
        );

        let driver_span = info_span!("mqtt_driver", topic = %config.topic);
        let driver = tokio::spawn(
            drive_events(eventloop, handoff, early, config.reconnect_delay).instrument(driver_span),
        );

        Ok(Self { client, driver })
    }

    /// Request a disconnect and wait up to `timeout` for the event loop to
    /// flush it.
    ///
    /// Best-effort: on timeout the event loop task is aborted and the call
    /// returns normally.
    pub async fn disconnect(self, timeout: Duration) {
        let MqttIntake { client, mut driver } = self;

        if let Err(e) = client.try_disconnect() {
            warn!(error = %e, "failed to request MQTT disconnect");
        }

        match tokio::time::timeout(timeout, &mut driver).await {
            Ok(Ok(())) => info!("disconnected from MQTT broker"),
            Ok(Err(e)) => error!(error = %e, "MQTT event loop task failed"),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "MQTT disconnect timed out, abandoning event loop"
                );
                driver.abort();
            }
        }
    }
}

async fn prepare_store(store: &StoreMode) -> DomainResult<()> {
    match store {
        StoreMode::Memory => debug!("using in-memory MQTT session store"),
        StoreMode::File(dir) => {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                DomainError::InvalidStore(format!(
                    "cannot create store directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            warn!(
                store = %dir.display(),
                "in-flight MQTT state is kept in memory; \
                 session persistence relies on the broker (clean_session = false)"
            );
        }
    }
    Ok(())
}

async fn with_startup_timeout<T>(
    timeout: Duration,
    stage: &str,
    fut: impl Future<Output = DomainResult<T>>,
) -> DomainResult<T> {
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        DomainError::MqttConnectionError(format!("no {} within {:?}", stage, timeout))
    })?
}

fn raw_message(publish: Publish) -> RawMessage {
    RawMessage::new(publish.topic, publish.payload)
}

/// Poll until the broker acknowledges the connection.
///
/// Returns whether the broker resumed an existing session.
async fn await_connack<S: EventSource>(
    source: &mut S,
    early: &mut Vec<RawMessage>,
) -> DomainResult<bool> {
    loop {
        match source.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(DomainError::MqttConnectionError(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                }
                return Ok(ack.session_present);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => early.push(raw_message(publish)),
            Ok(_) => {}
            Err(e) => return Err(DomainError::MqttConnectionError(e.to_string())),
        }
    }
}

/// Poll until the broker acknowledges the subscription.
async fn await_suback<S: EventSource>(
    source: &mut S,
    early: &mut Vec<RawMessage>,
) -> DomainResult<()> {
    loop {
        match source.poll().await {
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(DomainError::MqttSubscriptionError(
                        "broker rejected the subscription".to_string(),
                    ));
                }
                return Ok(());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => early.push(raw_message(publish)),
            Ok(_) => {}
            Err(e) => return Err(DomainError::MqttSubscriptionError(e.to_string())),
        }
    }
}

enum DriverStep {
    Deliver(RawMessage),
    Connected,
    ConnectionLost(ConnectionError),
    Stop,
    Ignore,
}

fn classify(event: Result<Event, ConnectionError>) -> DriverStep {
    match event {
        Ok(Event::Incoming(Packet::Publish(publish))) => DriverStep::Deliver(raw_message(publish)),
        Ok(Event::Incoming(Packet::ConnAck(_))) => DriverStep::Connected,
        Ok(Event::Outgoing(Outgoing::Disconnect)) => DriverStep::Stop,
        Ok(_) => DriverStep::Ignore,
        Err(ConnectionError::RequestsDone) => DriverStep::Stop,
        Err(e) => DriverStep::ConnectionLost(e),
    }
}

/// Drive the event loop until a disconnect has been sent.
///
/// Connection errors are logged; the next poll lets rumqttc reconnect.
async fn drive_events<S: EventSource>(
    mut source: S,
    handoff: HandoffSender,
    early: Vec<RawMessage>,
    reconnect_delay: Duration,
) {
    for message in early {
        deliver(&handoff, message).await;
    }

    loop {
        match classify(source.poll().await) {
            DriverStep::Deliver(message) => deliver(&handoff, message).await,
            DriverStep::Connected => info!("connected to MQTT broker"),
            DriverStep::ConnectionLost(e) => {
                error!(error = %e, "connection lost");
                tokio::time::sleep(reconnect_delay).await;
            }
            DriverStep::Stop => break,
            DriverStep::Ignore => {}
        }
    }

    debug!("MQTT event loop stopped");
}

async fn deliver(handoff: &HandoffSender, message: RawMessage) {
    if let Err(rejected) = handoff.send_async(message).await {
        warn!(
            topic = %rejected.0.topic,
            "reading processor is gone, dropping message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rumqttc::{ConnAck, QoS, SubAck};
    use std::collections::VecDeque;

    /// Replays a fixed list of events, then reports an outgoing disconnect.
    struct ScriptedEvents(VecDeque<Result<Event, ConnectionError>>);

    impl ScriptedEvents {
        fn new(events: Vec<Result<Event, ConnectionError>>) -> Self {
            Self(events.into())
        }
    }

    #[async_trait]
    impl EventSource for ScriptedEvents {
        async fn poll(&mut self) -> Result<Event, ConnectionError> {
            self.0
                .pop_front()
                .unwrap_or(Ok(Event::Outgoing(Outgoing::Disconnect)))
        }
    }

    fn publish(payload: &'static str) -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::Publish(Publish::new(
            "Hotpants/data",
            QoS::AtMostOnce,
            payload,
        ))))
    }

    fn connack(code: ConnectReturnCode, session_present: bool) -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::ConnAck(ConnAck {
            session_present,
            code,
        })))
    }

    fn suback(return_codes: Vec<SubscribeReasonCode>) -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::SubAck(SubAck {
            pkid: 1,
            return_codes,
        })))
    }

    fn io_error() -> ConnectionError {
        ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }

    async fn collect_payloads(rx: flume::Receiver<RawMessage>) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Ok(msg) = rx.recv_async().await {
            payloads.push(msg.payload_text().into_owned());
        }
        payloads
    }

    #[tokio::test]
    async fn test_driver_delivers_early_messages_first() {
        let (tx, rx) = flume::bounded(8);
        let source = ScriptedEvents::new(vec![publish("b"), publish("c")]);
        let early = vec![RawMessage::new("Hotpants/data", "a")];

        drive_events(source, tx, early, Duration::ZERO).await;

        assert_eq!(collect_payloads(rx).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_driver_keeps_topic_and_payload() {
        let (tx, rx) = flume::bounded(8);
        let source = ScriptedEvents::new(vec![publish(r#"{"name":"AA:BB"}"#)]);

        drive_events(source, tx, Vec::new(), Duration::ZERO).await;

        let msg = rx.recv_async().await.unwrap();
        assert_eq!(msg.topic, "Hotpants/data");
        assert_eq!(&msg.payload[..], br#"{"name":"AA:BB"}"#);
    }

    #[tokio::test]
    async fn test_driver_survives_connection_loss() {
        let (tx, rx) = flume::bounded(8);
        let source = ScriptedEvents::new(vec![
            publish("before"),
            Err(io_error()),
            connack(ConnectReturnCode::Success, true),
            Ok(Event::Incoming(Packet::PingResp)),
            publish("after"),
        ]);

        drive_events(source, tx, Vec::new(), Duration::ZERO).await;

        assert_eq!(collect_payloads(rx).await, vec!["before", "after"]);
    }

    #[tokio::test]
    async fn test_driver_stops_when_client_is_gone() {
        let (tx, rx) = flume::bounded(8);
        let source = ScriptedEvents::new(vec![
            publish("one"),
            Err(ConnectionError::RequestsDone),
            publish("never"),
        ]);

        drive_events(source, tx, Vec::new(), Duration::ZERO).await;

        assert_eq!(collect_payloads(rx).await, vec!["one"]);
    }

    #[tokio::test]
    async fn test_driver_drops_messages_without_consumer() {
        let (tx, rx) = flume::bounded(0);
        drop(rx);
        let source = ScriptedEvents::new(vec![publish("one"), publish("two")]);

        // Completes instead of waiting on a consumer that no longer exists.
        tokio::time::timeout(
            Duration::from_secs(1),
            drive_events(source, tx, Vec::new(), Duration::ZERO),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_await_connack_success() {
        let mut source = ScriptedEvents::new(vec![
            Ok(Event::Outgoing(Outgoing::PingReq)),
            publish("queued"),
            connack(ConnectReturnCode::Success, true),
        ]);
        let mut early = Vec::new();

        let session_present = await_connack(&mut source, &mut early).await.unwrap();

        assert!(session_present);
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].payload_text(), "queued");
    }

    #[tokio::test]
    async fn test_await_connack_refused() {
        let mut source = ScriptedEvents::new(vec![connack(
            ConnectReturnCode::NotAuthorized,
            false,
        )]);

        let result = await_connack(&mut source, &mut Vec::new()).await;
        assert!(matches!(result, Err(DomainError::MqttConnectionError(_))));
    }

    #[tokio::test]
    async fn test_await_connack_network_error() {
        let mut source = ScriptedEvents::new(vec![Err(io_error())]);

        let result = await_connack(&mut source, &mut Vec::new()).await;
        assert!(matches!(result, Err(DomainError::MqttConnectionError(_))));
    }

    #[tokio::test]
    async fn test_await_suback_success() {
        let mut source = ScriptedEvents::new(vec![
            Ok(Event::Outgoing(Outgoing::Subscribe(1))),
            suback(vec![SubscribeReasonCode::Success(QoS::AtMostOnce)]),
        ]);

        assert!(await_suback(&mut source, &mut Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_await_suback_rejected() {
        let mut source = ScriptedEvents::new(vec![suback(vec![SubscribeReasonCode::Failure])]);

        let result = await_suback(&mut source, &mut Vec::new()).await;
        assert!(matches!(result, Err(DomainError::MqttSubscriptionError(_))));
    }

    #[tokio::test]
    async fn test_startup_timeout() {
        let result: DomainResult<()> = with_startup_timeout(
            Duration::from_millis(10),
            "CONNACK",
            std::future::pending(),
        )
        .await;

        match result {
            Err(DomainError::MqttConnectionError(msg)) => assert!(msg.contains("CONNACK")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config_before_connecting() {
        let (tx, _rx) = flume::bounded(0);

        let bad_topic = MqttConfig {
            topic: "sensors/#/data".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            MqttIntake::start(&bad_topic, tx.clone()).await,
            Err(DomainError::InvalidTopicFilter(_))
        ));

        let bad_qos = MqttConfig {
            qos: 7,
            ..Default::default()
        };
        assert!(matches!(
            MqttIntake::start(&bad_qos, tx.clone()).await,
            Err(DomainError::InvalidQos(7))
        ));

        let bad_broker = MqttConfig {
            broker_url: "tcp://localhost:99999".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            MqttIntake::start(&bad_broker, tx).await,
            Err(DomainError::InvalidBrokerUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_directory_is_created() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("mqtt").join("session");

        prepare_store(&StoreMode::File(dir.clone())).await.unwrap();

        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_disconnect_waits_for_driver() {
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 10);
        let driver = tokio::spawn(async {});
        let intake = MqttIntake { client, driver };

        tokio::time::timeout(Duration::from_secs(1), intake.disconnect(Duration::from_millis(100)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_gives_up_after_timeout() {
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 10);
        let driver = tokio::spawn(std::future::pending::<()>());
        let intake = MqttIntake { client, driver };

        tokio::time::timeout(Duration::from_secs(1), intake.disconnect(Duration::from_millis(10)))
            .await
            .unwrap();
    }
}
