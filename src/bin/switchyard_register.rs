//! switchyard-register: create one user through the user service
//!
//! Usage: `switchyard-register <username> <male|female|unknown> <age>`
//!
//! Prints the created user id, or exits non-zero with the HTTP status the
//! failure maps to.

use std::sync::Arc;

use tracing::{error, info};

use switchyard::broker::ChannelHub;
use switchyard::config::Config;
use switchyard::rpc::RpcClient;
use switchyard::services::registration::UserServiceClient;
use switchyard::services::users::{CreateUserRequest, Gender};
use switchyard::utils::bootstrap::init_tracing;

const USAGE: &str = "usage: switchyard-register <username> <male|female|unknown> <age>";

fn parse_args() -> Result<CreateUserRequest, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [username, gender, age] = args.as_slice() else {
        return Err(USAGE.into());
    };

    let gender = match gender.as_str() {
        "male" => Gender::Male,
        "female" => Gender::Female,
        "unknown" => Gender::Unknown,
        other => return Err(format!("invalid gender '{}'\n{}", other, USAGE).into()),
    };

    Ok(CreateUserRequest {
        username: username.clone(),
        gender,
        age: age.parse()?,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let request = parse_args()?;
    let config = Config::load(None)?;

    let rpc = Arc::new(RpcClient::new(config.broker.connect(&ChannelHub::new())?));
    let client = UserServiceClient::new(
        Arc::clone(&rpc),
        config.queues.user_creation.clone(),
        config.rpc.timeout(),
    );

    let outcome = tokio::select! {
        outcome = client.create_user(&request) => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    rpc.shutdown().await?;

    match outcome {
        Some(Ok(created)) => {
            info!(username = %request.username, "Registration complete");
            println!("{}", created.created_user_id);
            Ok(())
        }
        Some(Err(e)) => {
            error!(status = e.http_status(), error = %e, "Registration failed");
            std::process::exit(1);
        }
        None => {
            info!("Interrupted");
            Ok(())
        }
    }
}
