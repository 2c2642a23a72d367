#[tokio::main]
async fn main() -> anyhow::Result<()> {
    syllabus_rag_server_lib::run().await
}
