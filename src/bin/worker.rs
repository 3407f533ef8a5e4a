#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examgrade::run_worker().await {
        eprintln!("examgrade-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
