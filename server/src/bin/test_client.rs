use clap::Parser;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use shared::{timestamp_secs, ClientMessage, PlayerInputMessage, ServerMessage, ShootMessage};
use std::time::{Duration, SystemTime};
use tokio::time::interval;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Connects to a running server, wanders around randomly and prints what the
/// server reports back.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
    /// Number of inputs to send before disconnecting
    #[clap(short, long, default_value = "90")]
    inputs: u32,
    /// Inputs per second
    #[clap(short, long, default_value = "30")]
    rate: u32,
    /// Fire a projectile every this many inputs, 0 never fires
    #[clap(long, default_value = "15")]
    shoot_every: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.url);
    let (ws, _) = connect_async(args.url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    // Wait for our player id before sending anything
    let player_id = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text)? {
                ServerMessage::PlayerId { player_id } => break player_id,
                ServerMessage::Error { code, message } => {
                    println!("Server refused a player slot ({}: {})", code, message);
                    return Ok(());
                }
                other => println!("Early message: {:?}", other),
            },
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err("server closed the connection".into()),
        }
    };
    println!("Assigned player id {}", player_id);

    let reader = tokio::spawn(async move {
        let mut states = 0u64;
        while let Some(Ok(frame)) = stream.next().await {
            let Message::Text(text) = frame else { continue };
            match ServerMessage::from_json(&text) {
                Ok(ServerMessage::GameState {
                    players,
                    projectiles,
                    ..
                }) => {
                    states += 1;
                    if states % 30 == 0 {
                        println!(
                            "State #{}: {} players, {} projectiles",
                            states,
                            players.len(),
                            projectiles.len()
                        );
                    }
                }
                Ok(other) => println!("Received: {:?}", other),
                Err(e) => println!("Undecodable message: {}", e),
            }
        }
        states
    });

    let mut rng = rand::thread_rng();
    let mut ticker = interval(Duration::from_secs(1) / args.rate.max(1));
    for sequence_id in 0..args.inputs {
        ticker.tick().await;

        let move_x: f64 = rng.gen_range(-1.0..=1.0);
        let input = ClientMessage::PlayerInput(PlayerInputMessage {
            player_id: player_id.clone(),
            move_x,
            move_y: rng.gen_range(-1.0..=1.0),
            facing_left: move_x < 0.0,
            timestamp: timestamp_secs(SystemTime::now()),
            sequence_id: i64::from(sequence_id),
        });
        sink.send(Message::Text(input.to_json()?.into())).await?;

        if args.shoot_every > 0 && sequence_id % args.shoot_every == 0 {
            let shot = ClientMessage::Shoot(ShootMessage {
                player_id: player_id.clone(),
                projectile_id: format!("{}-{}", player_id, sequence_id),
                pos_x: 0.0,
                pos_y: 0.0,
                dir_x: 1.0,
                dir_y: 0.0,
                speed: 10.0,
            });
            sink.send(Message::Text(shot.to_json()?.into())).await?;
        }
    }

    sink.send(Message::Close(None)).await?;
    let states = reader.await?;
    println!("Disconnected after {} state updates", states);
    Ok(())
}
