//! MCPHub server binary
//!
//! Run with: cargo run --bin mcphub -- serve
//! Or after build: ./target/release/mcphub serve

#[tokio::main]
async fn main() {
    // Local .env values feed ${VAR} expansion in the settings document.
    dotenvy::dotenv().ok();

    mcphub::init_logging();

    let code = mcphub::cli::run().await;
    std::process::exit(code);
}
