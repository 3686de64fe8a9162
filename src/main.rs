//! Image Tag Crawler - finds the newest release tag of container images as of past dates

use image_tag_crawler::cli::{Args, Runner};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_args();
    let runner = Runner::new(args);

    match runner.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            runner.logger().error(&format!("{}", e));
            ExitCode::FAILURE
        }
    }
}
