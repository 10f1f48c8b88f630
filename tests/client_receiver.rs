//! End-to-end tests: a real client talking TCP to a real receiver.

use futures::StreamExt;
use plotstream::{
    BatchConfig, Client, ClientConfig, Message, Received, Receiver, ReceiverConfig, SessionStatus, StreamError,
    Timestamp,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn receiver() -> Receiver {
    init_tracing();
    Receiver::bind(ReceiverConfig::new("127.0.0.1:0")).await.expect("bind ephemeral port")
}

async fn next(receiver: &mut Receiver) -> Received {
    tokio::time::timeout(Duration::from_secs(5), receiver.next())
        .await
        .expect("timed out waiting for a message")
        .expect("receiver closed")
}

async fn connected(receiver: &Receiver, config: ClientConfig) -> Client {
    let client = Client::new(config).expect("valid config");
    client.connect(&receiver.local_addr().to_string()).await.expect("connect");
    client
}

#[tokio::test]
async fn sample_frame_is_exact_on_port_9000() -> anyhow::Result<()> {
    init_tracing();
    let listener = match TcpListener::bind("127.0.0.1:9000").await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("skipping: 127.0.0.1:9000 unavailable ({})", e);
            return Ok(());
        }
    };

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await?;
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await?;
        Ok::<_, std::io::Error>(received)
    });

    let t = Timestamp::now();
    let client = Client::new(ClientConfig::default())?;
    client.connect("127.0.0.1:9000").await?;
    client.send_sample("temp", t, 21.5).await?;
    client.disconnect().await;

    let mut expected = vec![0x01];
    expected.extend_from_slice(&4u32.to_le_bytes());
    expected.extend_from_slice(b"temp");
    expected.extend_from_slice(&t.as_secs_f64().to_le_bytes());
    expected.extend_from_slice(&21.5f64.to_le_bytes());
    assert_eq!(server.await??, expected);
    Ok(())
}

#[tokio::test]
async fn sampled_batch_expands_to_implicit_timestamps() -> anyhow::Result<()> {
    let mut receiver = receiver().await;
    let client = connected(&receiver, ClientConfig::default()).await;

    let t0 = Timestamp::from(1_700_000_000.0);
    client.send_sampled("pi", t0, 0.01, &[0.0, 0.5, 1.0]).await?;

    let received = next(&mut receiver).await;
    assert_eq!(received.message.name(), "pi");
    assert_eq!(
        received.message.observations(),
        vec![(t0, 0.0), (t0.offset(0.01), 0.5), (t0.offset(0.02), 1.0)]
    );

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn refused_connect_leaves_client_unopened() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = Client::new(ClientConfig::default().with_connect_timeout(Duration::from_secs(2))).unwrap();
    let err = client.connect(&address).await.unwrap_err();
    assert!(matches!(err, StreamError::Connection { .. }), "got {:?}", err);
    assert!(err.is_retryable());
    assert_eq!(client.status(), SessionStatus::Unopened);

    client.disconnect().await;
    assert_eq!(client.status(), SessionStatus::Unopened);
    assert!(matches!(
        client.send_sample("temp", 0.0, 1.0).await,
        Err(StreamError::InvalidState { state: SessionStatus::Unopened, .. })
    ));
}

#[tokio::test]
async fn connect_retries_until_the_receiver_appears() -> anyhow::Result<()> {
    init_tracing();
    let placeholder = TcpListener::bind("127.0.0.1:0").await?;
    let address = placeholder.local_addr()?.to_string();
    drop(placeholder);

    let late_bind = {
        let address = address.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Receiver::bind(ReceiverConfig::new(address)).await
        })
    };

    let config = ClientConfig::default().with_connect_retries(8, Duration::from_millis(25));
    let client = Client::new(config)?;
    client.connect(&address).await?;
    let mut receiver = late_bind.await??;

    client.send_text("log", 1.0, "hello after retry").await?;
    match next(&mut receiver).await.message {
        Message::Text(text) => assert_eq!(text.text, "hello after retry"),
        other => panic!("expected text, got {:?}", other),
    }
    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn handshake_is_accepted_by_receiver() -> anyhow::Result<()> {
    let mut receiver = receiver().await;
    let client = connected(&receiver, ClientConfig::default().with_handshake(true)).await;

    client.send_function_enter("trace", 1.0, "main").await?;
    client.send_function_exit("trace", 2.0).await?;

    assert!(matches!(next(&mut receiver).await.message, Message::Profile(_)));
    assert!(matches!(next(&mut receiver).await.message, Message::Profile(_)));
    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn batched_samples_all_arrive_in_order() -> anyhow::Result<()> {
    let mut receiver = receiver().await;
    let config = ClientConfig::default().with_batching(BatchConfig::new(16, Duration::from_secs(10)));
    let client = connected(&receiver, config).await;

    for i in 0..40 {
        client.send_sample("temp", i as f64, i as f64).await?;
    }
    client.disconnect().await;

    let mut values = Vec::new();
    while values.len() < 40 {
        let received = next(&mut receiver).await;
        assert!(matches!(received.message, Message::SampleBatch(_)));
        values.extend(received.message.observations().into_iter().map(|(_, v)| v));
    }
    assert_eq!(values, (0..40).map(|i| i as f64).collect::<Vec<_>>());
    assert_eq!(client.stats().flushes, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_tasks_deliver_every_frame() -> anyhow::Result<()> {
    let mut receiver = receiver().await;
    let client = Arc::new(connected(&receiver, ClientConfig::default()).await);

    let mut tasks = tokio::task::JoinSet::new();
    for task in 0..8 {
        let client = client.clone();
        tasks.spawn(async move {
            for i in 0..50 {
                client.send_sample(&format!("task_{}", task), i as f64, i as f64).await?;
            }
            Ok::<_, StreamError>(())
        });
    }
    while let Some(result) = tasks.join_next().await {
        result??;
    }

    let mut per_task = [0usize; 8];
    for _ in 0..400 {
        let received = next(&mut receiver).await;
        let index: usize = received.message.name().trim_start_matches("task_").parse()?;
        per_task[index] += 1;
    }
    assert!(per_task.iter().all(|&count| count == 50));
    assert_eq!(client.stats().frames_written, 400);
    Ok(())
}

#[tokio::test]
async fn reconnect_uses_last_address() -> anyhow::Result<()> {
    let mut receiver = receiver().await;
    let client = connected(&receiver, ClientConfig::default()).await;

    client.disconnect().await;
    assert_eq!(client.status(), SessionStatus::Closed);

    client.reconnect().await?;
    assert_eq!(client.status(), SessionStatus::Open);
    client.send_event("pit", 3.0, [("lap", "7")]).await?;

    match next(&mut receiver).await.message {
        Message::Event(event) => assert_eq!(event.attributes["lap"], "7"),
        other => panic!("expected event, got {:?}", other),
    }
    client.disconnect().await;
    Ok(())
}
