use std::time::Duration;

use kafka_messenger::{CancellationToken, Messenger};



#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();


    // Kafka Config
    let brokers = ["localhost:9092"];
    let group_id = "example_consumer_group_id";
    let topic = "orders";


    let token = CancellationToken::new();
    let mut messenger = Messenger::new(topic, group_id, brokers).await?;

    let (mut messages, mut errors) = messenger.start_consuming(&token)?;


    //  produce  --->  orders  --->  consumer task  --->  messages
    //                                            \--->  errors

    for i in 0..10 {
        messenger.produce(&token, format!("key-{}", i % 3), format!("payload - {}", i)).await?;
    }


    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);

    let mut received = 0;
    while received < 10 {
        tokio::select! {
            Some(msg) = messages.recv() => {
                println!("==> {}", msg);
                received += 1;
            }
            Some(err) = errors.recv() => {
                eprintln!("consumer error: {}", err);
            }
            _ = &mut deadline => break,
        }
    }


    // Safe Shutdown
    messenger.stop_consuming().await?;
    messenger.close().await?;

    Ok(())
}
