use ecr_mirror::cli::{Args, Runner};
use tracing::error;

#[tokio::main]
async fn main() {
    let args = Args::parse_args();

    if let Err(e) = ecr_mirror::logging::init(Some(&args.log_level)) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let result = match Runner::new(args) {
        Ok(runner) => runner.run().await.map(|_| ()),
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!(pool_fatal = e.is_pool_fatal(), "{}", e);
        std::process::exit(1);
    }
}
