#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examgrade::run().await {
        eprintln!("examgrade fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
