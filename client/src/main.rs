use clap::Parser;
use client::network::ClientSyncProxy;
use log::{error, info};
use serde_json::Value;
use shared::User;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Stable user id
    #[arg(short = 'u', long)]
    user_id: String,

    /// Display name
    #[arg(short = 'n', long)]
    username: String,

    /// Group (room) to join
    #[arg(short = 'g', long, default_value = "lobby")]
    group: String,
}

fn print_cell(label: &'static str) -> impl Fn(&Value, &str) + Send + Sync + 'static {
    move |value, _| println!("[{}] {}", label, value)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let proxy = ClientSyncProxy::connect(&args.server).await?;

    let group = Some(args.group.as_str());
    let user = Some(args.user_id.as_str());
    proxy.subscribe_path("room.sync", group, print_cell("room"))?;
    proxy.subscribe_path("gameEvents.sync", group, print_cell("events"))?;
    proxy.subscribe_path("playerInfo.sync", user, print_cell("info"))?;
    proxy.subscribe_path("playerRole.sync", user, print_cell("role"))?;

    let me = User::new(args.user_id.as_str(), args.username.as_str());
    proxy.confirm_join(&me, &args.group).await?;
    info!("Joined {} as {}", args.group, args.username);
    info!("Commands: start | vote <player> | action <player> [index] | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let outcome = match words.as_slice() {
            ["start"] => proxy.game_start().await,
            ["vote", target] => proxy.game_vote(target).await,
            ["action", target] => proxy.game_action(target, 0).await,
            ["action", target, index] => match index.parse() {
                Ok(index) => proxy.game_action(target, index).await,
                Err(_) => {
                    error!("Action index must be a number");
                    continue;
                }
            },
            ["quit"] => break,
            [] => continue,
            _ => {
                error!("Unknown command: {}", line);
                continue;
            }
        };

        if let Err(e) = outcome {
            error!("{}", e);
        }
        if proxy.is_closed() {
            break;
        }
    }

    Ok(())
}
