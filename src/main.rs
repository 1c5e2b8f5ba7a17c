mod app;
mod dedup;
mod extract;
mod types;

#[tokio::main]
async fn main() {
    app::run().await;
}
