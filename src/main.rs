#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden::run().await
}
