use std::error::Error;

use h2mux_core::client::Connector;
use h2mux_core::{Config, PseudoHeaders, StreamAttributes, StreamEvent};

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn Error>> {
    std::env::set_var("RUST_LOG", "trace");
    env_logger::init();

    let connector = Connector::new(Config::default());
    let connection = connector.connect("127.0.0.1:8443").await?;

    let pseudo = PseudoHeaders::request("GET", "https", "127.0.0.1:8443", "/test/index.html");
    let (coordinator, mut response) = connection
        .send_request(pseudo, Vec::new(), StreamAttributes::default(), true)
        .await?;
    // No body to send for a GET; drop the coordinator now that headers
    // have gone out.
    drop(coordinator);

    while let Some(event) = response.recv().await {
        match event {
            StreamEvent::Headers(h) => println!("response headers: {:#?}", h),
            StreamEvent::Data(bytes) => println!("got {} bytes", bytes.len()),
            StreamEvent::Trailers(t) => println!("trailers: {:#?}", t),
            StreamEvent::Reset(r) => println!("stream reset: {r}"),
            StreamEvent::Eof => break,
        }
    }

    Ok(())
}
