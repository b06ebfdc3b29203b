#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mobilealerts_proxy::app::bootstrap().await
}
