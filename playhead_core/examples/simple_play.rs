use std::time::Duration;

use playhead_core::{PlayMessage, Player};

fn main() {
    env_logger::init();

    let arg = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: simple_play <uri>");
        std::process::exit(1);
    });
    let uri = url::Url::parse(&arg).unwrap_or_else(|err| {
        eprintln!("invalid uri {}: {}", arg, err);
        std::process::exit(1);
    });

    let player = Player::new(None).expect("failed to create player");
    let bus = player.message_bus();

    player.set_uri(&uri);
    player.play();

    loop {
        let Some(message) = bus.wait_timeout(Duration::from_secs(1)) else {
            continue;
        };
        match message {
            PlayMessage::PositionUpdated { position } => {
                let duration = player
                    .duration()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "unknown".into());
                println!("{} / {}", position, duration);
            }
            PlayMessage::StateChanged { state } => println!("state: {}", state),
            PlayMessage::Buffering { percent } => println!("buffering {}%", percent),
            PlayMessage::MediaInfoUpdated { info } => {
                if let Some(title) = &info.title {
                    println!("title: {}", title);
                }
            }
            PlayMessage::EndOfStream => {
                println!("end of stream");
                break;
            }
            PlayMessage::Error { error } => {
                eprintln!("error: {}", error);
                break;
            }
            PlayMessage::Warning { warning } => eprintln!("warning: {}", warning),
            _ => {}
        }
    }
}
