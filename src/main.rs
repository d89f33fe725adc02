#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lead_bridge_lib::run().await
}
