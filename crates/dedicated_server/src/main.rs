#[tokio::main]
async fn main() {
    let code = lib_dedicated_server::init().await;
    std::process::exit(code);
}
