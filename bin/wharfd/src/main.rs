#![deny(unsafe_code)]

//! Entry point: binds the default [`daemon::ServerConfig`] and serves
//! forever. Takes no arguments and reads no environment variables for its
//! own behavior, per the protocol design's external-interfaces section.

use std::process::ExitCode;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match daemon::run(daemon::ServerConfig::default()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("wharfd: {err}");
            ExitCode::FAILURE
        }
    }
}
