#[tokio::main]
async fn main() -> anyhow::Result<()> {
    echolens_lib::run().await
}
