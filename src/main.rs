use mailroom::notifier::LogNotifier;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    mailroom::run().notifier(LogNotifier).start().await
}
