use std::collections::HashMap;

pub fn main() {
    env_logger::init();

    let api_key = std::env::var("SPLIT_SDK_KEY").unwrap();
    let mut config = splitio::ClientConfig::from_api_key(api_key);
    config.impression_listener(|impression: splitio::Impression| println!("Impression: {:?}", impression));
    let mut client = config.to_client();

    // Start a poller thread to fetch flags and segments from the server.
    let poller = client.start_poller_thread().unwrap();

    // Block waiting for the first synchronization. Until this call returns, the client will
    // return "control" for all flags.
    poller.wait_until_ready().unwrap();

    let treatment = client.get_treatment("test-key", None, "a-flag", &HashMap::new());
    println!("Treatment: {:?}", treatment);

    poller.shutdown().unwrap();
}
