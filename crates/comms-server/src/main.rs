#[tokio::main]
async fn main() -> anyhow::Result<()> {
    comms_server::run().await
}
