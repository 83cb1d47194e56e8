use acr_image_puller::cli::{Args, Runner};

#[tokio::main]
async fn main() {
    let args = Args::parse_args();
    let runner = Runner::new(args);

    if let Err(err) = runner.run().await {
        runner.output().error(&err.to_string());
        std::process::exit(1);
    }
}
